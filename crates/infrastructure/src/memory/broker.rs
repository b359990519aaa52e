use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use taskhub_core::{TaskHubError, TaskHubResult};
use taskhub_domain::ports::{Delivery, MessageBroker};
use tokio::sync::Mutex;

#[derive(Default)]
struct Inner {
    queues: HashMap<String, VecDeque<Vec<u8>>>,
    /// delivery_tag -> (队列, 消息体)
    unacked: HashMap<u64, (String, Vec<u8>)>,
    acked: Vec<u64>,
    rejected: Vec<u64>,
    next_tag: u64,
}

/// 内存消息代理，语义与 basic_get + 显式 ack 一致
#[derive(Default)]
pub struct MemoryBroker {
    inner: Mutex<Inner>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn publish(&self, queue: &str, body: impl Into<Vec<u8>>) {
        self.inner
            .lock()
            .await
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_back(body.into());
    }

    /// 把所有未确认的消息放回队首，模拟消费者断线后的重新投递
    pub async fn redeliver_unacked(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let mut pending: Vec<_> = inner.unacked.drain().collect();
        pending.sort_by_key(|(tag, _)| std::cmp::Reverse(*tag));
        let count = pending.len();
        for (_, (queue, body)) in pending {
            inner.queues.entry(queue).or_default().push_front(body);
        }
        count
    }

    pub async fn acked_count(&self) -> usize {
        self.inner.lock().await.acked.len()
    }

    pub async fn rejected_count(&self) -> usize {
        self.inner.lock().await.rejected.len()
    }

    pub async fn unacked_count(&self) -> usize {
        self.inner.lock().await.unacked.len()
    }
}

#[async_trait]
impl MessageBroker for MemoryBroker {
    async fn fetch(&self, queue: &str) -> TaskHubResult<Option<Delivery>> {
        let mut inner = self.inner.lock().await;
        let Some(body) = inner.queues.get_mut(queue).and_then(VecDeque::pop_front) else {
            return Ok(None);
        };
        let remaining = inner.queues.get(queue).map_or(0, VecDeque::len) as u32;

        inner.next_tag += 1;
        let delivery_tag = inner.next_tag;
        inner
            .unacked
            .insert(delivery_tag, (queue.to_string(), body.clone()));

        Ok(Some(Delivery {
            delivery_tag,
            body,
            remaining,
        }))
    }

    async fn ack(&self, delivery_tag: u64) -> TaskHubResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.unacked.remove(&delivery_tag).is_none() {
            return Err(TaskHubError::MessageQueue(format!(
                "未知的delivery_tag: {delivery_tag}"
            )));
        }
        inner.acked.push(delivery_tag);
        Ok(())
    }

    async fn reject(&self, delivery_tag: u64, requeue: bool) -> TaskHubResult<()> {
        let mut inner = self.inner.lock().await;
        let Some((queue, body)) = inner.unacked.remove(&delivery_tag) else {
            return Err(TaskHubError::MessageQueue(format!(
                "未知的delivery_tag: {delivery_tag}"
            )));
        };
        inner.rejected.push(delivery_tag);
        // 与RabbitMQ一致，重新入队的消息回到队首
        if requeue {
            inner.queues.entry(queue).or_default().push_front(body);
        }
        Ok(())
    }

    async fn queue_depth(&self, queue: &str) -> TaskHubResult<u32> {
        let inner = self.inner.lock().await;
        Ok(inner.queues.get(queue).map_or(0, VecDeque::len) as u32)
    }
}
