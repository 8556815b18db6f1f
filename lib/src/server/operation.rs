use async_trait::async_trait;

use super::{request::NfsRequest, response::NfsOpResponse};

/// One operation of a COMPOUND request. The embedding dispatcher decodes the
/// argument and drives `execute` with the running compound context.
#[async_trait]
pub trait NfsOperation: Sync {
    async fn execute(&self, request: NfsRequest) -> NfsOpResponse;
}
