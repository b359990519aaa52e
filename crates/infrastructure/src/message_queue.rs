use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use lapin::{options::*, types::FieldTable, Channel, Connection, ConnectionProperties, Queue};
use taskhub_core::config::MessageQueueConfig;
use taskhub_core::{TaskHubError, TaskHubResult};
use taskhub_domain::ports::{Delivery, MessageBroker};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// RabbitMQ消息代理实现
///
/// 只使用 basic_get 拉取单条消息，确认由调用方在结果落库后显式发起。
pub struct RabbitMQBroker {
    connection: Connection,
    channel: Mutex<Channel>,
    declared: Mutex<HashSet<String>>,
}

impl RabbitMQBroker {
    pub async fn connect(config: &MessageQueueConfig) -> TaskHubResult<Self> {
        let connect = Connection::connect(&config.url, ConnectionProperties::default());
        let connection =
            tokio::time::timeout(Duration::from_secs(config.connection_timeout_seconds), connect)
                .await
                .map_err(|_| TaskHubError::MessageQueue("连接RabbitMQ超时".to_string()))?
                .map_err(|e| TaskHubError::MessageQueue(format!("连接RabbitMQ失败: {e}")))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| TaskHubError::MessageQueue(format!("创建通道失败: {e}")))?;

        info!("成功连接到RabbitMQ");

        Ok(Self {
            connection,
            channel: Mutex::new(channel),
            declared: Mutex::new(HashSet::new()),
        })
    }

    /// 声明持久化队列，已存在时返回当前消息数
    async fn declare_queue(&self, channel: &Channel, queue_name: &str) -> TaskHubResult<Queue> {
        let queue = channel
            .queue_declare(
                queue_name,
                QueueDeclareOptions {
                    durable: true,
                    exclusive: false,
                    auto_delete: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                TaskHubError::MessageQueue(format!("声明队列 {queue_name} 失败: {e}"))
            })?;

        debug!("队列 {} 声明成功", queue_name);
        Ok(queue)
    }

    /// 对不存在的队列做 basic_get 会关闭通道，所以首次访问前先声明
    async fn ensure_declared(&self, channel: &Channel, queue_name: &str) -> TaskHubResult<()> {
        let mut declared = self.declared.lock().await;
        if !declared.contains(queue_name) {
            self.declare_queue(channel, queue_name).await?;
            declared.insert(queue_name.to_string());
        }
        Ok(())
    }

    pub async fn close(&self) -> TaskHubResult<()> {
        self.connection
            .close(200, "正常关闭")
            .await
            .map_err(|e| TaskHubError::MessageQueue(format!("关闭连接失败: {e}")))?;

        info!("RabbitMQ连接已关闭");
        Ok(())
    }
}

#[async_trait]
impl MessageBroker for RabbitMQBroker {
    async fn fetch(&self, queue: &str) -> TaskHubResult<Option<Delivery>> {
        let channel = self.channel.lock().await;
        self.ensure_declared(&channel, queue).await?;

        let message = channel
            .basic_get(queue, BasicGetOptions::default())
            .await
            .map_err(|e| TaskHubError::MessageQueue(format!("从队列 {queue} 获取消息失败: {e}")))?;

        Ok(message.map(|message| Delivery {
            delivery_tag: message.delivery.delivery_tag,
            body: message.delivery.data.clone(),
            remaining: message.message_count,
        }))
    }

    async fn ack(&self, delivery_tag: u64) -> TaskHubResult<()> {
        let channel = self.channel.lock().await;
        channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| TaskHubError::MessageQueue(format!("确认消息失败: {e}")))?;
        debug!("消息已确认: {}", delivery_tag);
        Ok(())
    }

    async fn reject(&self, delivery_tag: u64, requeue: bool) -> TaskHubResult<()> {
        let channel = self.channel.lock().await;
        channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    multiple: false,
                    requeue,
                },
            )
            .await
            .map_err(|e| TaskHubError::MessageQueue(format!("否认消息失败: {e}")))?;
        debug!("消息已否认: {}, requeue={}", delivery_tag, requeue);
        Ok(())
    }

    async fn queue_depth(&self, queue: &str) -> TaskHubResult<u32> {
        let channel = self.channel.lock().await;
        let info = self.declare_queue(&channel, queue).await?;
        Ok(info.message_count())
    }
}
