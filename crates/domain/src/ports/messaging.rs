use async_trait::async_trait;
use taskhub_core::TaskHubResult;

/// 从代理取到的一条待确认消息
#[derive(Debug, Clone)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub body: Vec<u8>,
    /// 取走本条后队列中剩余的消息数
    pub remaining: u32,
}

/// Interface for broker queue operations
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// 取一条消息，队列为空时返回None
    async fn fetch(&self, queue: &str) -> TaskHubResult<Option<Delivery>>;
    /// 结果落库之后才允许确认
    async fn ack(&self, delivery_tag: u64) -> TaskHubResult<()>;
    /// 否认一条消息，`requeue` 为真时放回队列等待重新投递
    async fn reject(&self, delivery_tag: u64, requeue: bool) -> TaskHubResult<()>;
    async fn queue_depth(&self, queue: &str) -> TaskHubResult<u32>;
}
