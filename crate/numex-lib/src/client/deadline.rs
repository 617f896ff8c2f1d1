use std::time::{Duration, Instant};

use tarpc::client::RpcError;
use tarpc::client::stub::Stub;
use tarpc::context::Context;

/// Stub that gives every exchange the same time budget.
///
/// Without a budget, calls keep the deadline of their context.
#[derive(Clone)]
pub struct WithDeadline<T>
where
    T: Stub,
{
    inner: T,
    deadline: Option<Duration>,
}

impl<T: Stub> WithDeadline<T> {
    pub fn new(inner: T, deadline: Option<Duration>) -> Self {
        Self { inner, deadline }
    }

    /// A budget too large to represent keeps the context deadline.
    fn apply(&self, mut ctx: Context) -> Context {
        if let Some(deadline) = self
            .deadline
            .and_then(|budget| Instant::now().checked_add(budget))
        {
            ctx.deadline = deadline;
        }

        ctx
    }
}

impl<T: Stub> Stub for WithDeadline<T> {
    type Req = T::Req;
    type Resp = T::Resp;

    async fn call(&self, ctx: Context, req: Self::Req) -> Result<Self::Resp, RpcError> {
        self.inner.call(self.apply(ctx), req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ExchangeMessage;
    use crate::model::service::{NumberServiceClient, NumberServiceRequest, NumberServiceResponse};
    use tarpc::context;

    /// Answers with the number of seconds left before the deadline.
    #[derive(Clone)]
    struct RemainingSecs;

    impl Stub for RemainingSecs {
        type Req = NumberServiceRequest;
        type Resp = NumberServiceResponse;

        async fn call(
            &self,
            ctx: Context,
            req: NumberServiceRequest,
        ) -> Result<NumberServiceResponse, RpcError> {
            let NumberServiceRequest::SendNumber { request } = req;
            let left = ctx.deadline.saturating_duration_since(Instant::now());

            Ok(NumberServiceResponse::SendNumber(ExchangeMessage::new(
                left.as_secs() as u32,
                request.client_id,
            )))
        }
    }

    async fn remaining(deadline: Option<Duration>) -> anyhow::Result<u32> {
        let client = NumberServiceClient::from(WithDeadline::new(RemainingSecs, deadline));
        let response = client
            .send_number(context::current(), ExchangeMessage::new(1, "Grace"))
            .await?;
        assert_eq!("Grace", response.client_id);

        Ok(response.number)
    }

    #[tokio::test]
    async fn deadline_replaces_context_default() -> anyhow::Result<()> {
        // context::current() allows 10s
        let left = remaining(Some(Duration::from_secs(60))).await?;
        assert!(left > 10, "{left}");
        assert!(left <= 60, "{left}");

        let left = remaining(Some(Duration::from_millis(1500))).await?;
        assert!(left <= 1, "{left}");

        Ok(())
    }

    #[tokio::test]
    async fn huge_deadline_keeps_context_default() -> anyhow::Result<()> {
        let left = remaining(Some(Duration::MAX)).await?;
        assert!(left <= 10, "{left}");
        assert!(left >= 8, "{left}");

        Ok(())
    }

    #[tokio::test]
    async fn no_deadline_keeps_context_default() -> anyhow::Result<()> {
        let left = remaining(None).await?;
        assert!(left <= 10, "{left}");
        assert!(left >= 8, "{left}");

        Ok(())
    }
}
