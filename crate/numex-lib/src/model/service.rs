//! Service definition for numex
//!
//! This module defines the NumberService trait for use with tarpc 0.36.

use std::ops::RangeInclusive;

use rand::Rng;

/// Range of the numbers exchanged between client and server.
pub const NUMBER_RANGE: RangeInclusive<u32> = 1..=6;

/// Request and response of [NumberService::send_number].
///
/// Both directions share the same shape: a number and the identifier
/// of the client that started the exchange.
#[derive(Debug, Clone, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ExchangeMessage {
    pub number: u32,
    pub client_id: String,
}

impl ExchangeMessage {
    pub fn new(number: u32, client_id: impl Into<String>) -> Self {
        Self {
            number,
            client_id: client_id.into(),
        }
    }
}

/// Roll a six-sided die.
pub fn roll<R: Rng + ?Sized>(rng: &mut R) -> u32 {
    rng.gen_range(NUMBER_RANGE)
}

/// The service trait for number exchanges.
#[tarpc::service]
pub trait NumberService {
    /// Send a number, get one back.
    ///
    /// The response carries the client ID of the request, unchanged.
    async fn send_number(request: ExchangeMessage) -> ExchangeMessage;
}
