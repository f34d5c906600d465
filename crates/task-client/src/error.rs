#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Store(#[from] task_runtime::StoreError),

    #[error(transparent)]
    Gateway(#[from] task_runtime::GatewayError),

    #[error("failed to open the ledger store's notification channel: {0}")]
    Listen(#[from] sqlx::Error),
}
