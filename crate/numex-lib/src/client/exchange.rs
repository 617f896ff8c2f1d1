use std::time::Duration;

use tarpc::client::stub::Stub;
use tarpc::context;
use tokio::sync::watch;
use tokio_retry::strategy::FixedInterval;

use crate::client::deadline::WithDeadline;
use crate::model::service::{NumberServiceClient, NumberServiceRequest, NumberServiceResponse};
use crate::model::{ClientError, ClientId, ExchangeMessage, roll};

/// Delay between retries used by the command-line client.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Delay between two successful exchanges.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Wait the same delay before every retry, forever.
pub fn default_retry_strategy(delay: Duration) -> FixedInterval {
    FixedInterval::new(delay)
}

/// Opens a session to the server.
#[allow(async_fn_in_trait)]
pub trait Connect {
    type Stub;

    async fn run(&self) -> Result<Self::Stub, ClientError>;
}

/// What happened to the client connection.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ClientConnectionState {
    /// Initial state, and state after a failure.
    Disconnected,
    /// The client is attempting to connect.
    Connecting,
    /// A session is open.
    Connected,
}

#[derive(Clone)]
pub struct ExchangeOptions {
    /// How long to wait after a successful exchange.
    pub interval: Duration,

    /// Deadline of a single exchange; tarpc's default if unset.
    pub deadline: Option<Duration>,

    /// Stop after that many successful exchanges.
    pub max_exchanges: Option<u64>,

    /// Receives connection state changes.
    pub connection_events: Option<watch::Sender<ClientConnectionState>>,
}

impl Default for ExchangeOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            deadline: None,
            max_exchanges: None,
            connection_events: None,
        }
    }
}

/// What a loop that reached [ExchangeOptions::max_exchanges] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExchangeReport {
    /// Successful exchanges.
    pub exchanges: u64,

    /// Sessions opened, including the first one.
    pub connections: u64,
}

/// Exchanges numbers with the server, reconnecting after failures.
///
/// Connection and exchange failures are logged and retried after the
/// next delay of the retry strategy; the strategy restarts after
/// every successful exchange. Configuration errors end the loop.
pub struct ExchangeLoop<C, S> {
    client_id: ClientId,
    connect: C,
    strategy: S,
    options: ExchangeOptions,
}

impl<C, S> ExchangeLoop<C, S>
where
    C: Connect,
    C::Stub: Stub<Req = NumberServiceRequest, Resp = NumberServiceResponse>,
    S: Iterator<Item = Duration> + Clone,
{
    pub fn new(client_id: ClientId, connect: C, strategy: S, options: ExchangeOptions) -> Self {
        Self {
            client_id,
            connect,
            strategy,
            options,
        }
    }

    /// Run until [ExchangeOptions::max_exchanges] is reached, forever
    /// if unset.
    ///
    /// Fails on configuration errors or once a finite retry strategy
    /// runs out.
    pub async fn run(&self) -> Result<ExchangeReport, ClientError> {
        let mut report = ExchangeReport::default();
        let mut retry = Retry::new(self.strategy.clone());
        self.publish(ClientConnectionState::Disconnected);
        loop {
            self.publish(ClientConnectionState::Connecting);
            let stub = match self.connect.run().await {
                Ok(stub) => stub,
                Err(err) if err.is_retryable() => {
                    self.publish(ClientConnectionState::Disconnected);
                    log::error!("{err}");
                    let delay = retry.next_delay()?;
                    log::info!("Retrying connection in {delay:?}...");
                    tokio::time::sleep(delay).await;
                    continue;
                }
                Err(err) => {
                    self.publish(ClientConnectionState::Disconnected);
                    return Err(err);
                }
            };
            report.connections += 1;
            self.publish(ClientConnectionState::Connected);
            log::debug!("Client {} connected", self.client_id);

            let client = NumberServiceClient::from(WithDeadline::new(stub, self.options.deadline));
            let err = loop {
                if let Err(err) = self.exchange(&client).await {
                    break err;
                }
                report.exchanges += 1;
                retry = Retry::new(self.strategy.clone());
                if self
                    .options
                    .max_exchanges
                    .is_some_and(|max| report.exchanges >= max)
                {
                    self.publish(ClientConnectionState::Disconnected);
                    return Ok(report);
                }
                tokio::time::sleep(self.options.interval).await;
            };

            // The session is abandoned; the next one is built from scratch.
            drop(client);
            self.publish(ClientConnectionState::Disconnected);
            log::error!("{err}");
            let delay = retry.next_delay()?;
            tokio::time::sleep(delay).await;
        }
    }

    /// Send one number and wait for the answer.
    pub async fn exchange<T>(
        &self,
        client: &NumberServiceClient<T>,
    ) -> Result<ExchangeMessage, ClientError>
    where
        T: Stub<Req = NumberServiceRequest, Resp = NumberServiceResponse>,
    {
        let number = roll(&mut rand::thread_rng());
        log::info!("Client {} sending number: {}", self.client_id, number);
        let response = client
            .send_number(
                context::current(),
                ExchangeMessage::new(number, self.client_id.as_str()),
            )
            .await?;
        log::info!(
            "Client {} received number: {} from server",
            self.client_id,
            response.number
        );

        Ok(response)
    }

    fn publish(&self, state: ClientConnectionState) {
        if let Some(tx) = &self.options.connection_events {
            let _ = tx.send(state);
        }
    }
}

/// Walks through a retry strategy, counting failures.
struct Retry<S> {
    strategy: S,
    failures: u32,
}

impl<S: Iterator<Item = Duration>> Retry<S> {
    fn new(strategy: S) -> Self {
        Self {
            strategy,
            failures: 0,
        }
    }

    fn next_delay(&mut self) -> Result<Duration, ClientError> {
        self.failures += 1;

        self.strategy
            .next()
            .ok_or(ClientError::GaveUp(self.failures))
    }
}
