use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lapin::{
    options::*, types::FieldTable, BasicProperties, Channel, Connection, ConnectionProperties,
    ExchangeKind,
};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info};

use cronbeat_core::{SchedulerError, SchedulerResult};
use cronbeat_domain::{
    DestinationConfig, DispatchReceipt, ExecutorFactory, TaskExecutor, TaskIdentity, TaskMessage,
};

/// RabbitMQ任务执行器
///
/// 一个实例对应一个Broker连接：注册任务标识时声明交换机、队列
/// 和绑定，分发时把触发消息发布到条目的路由上。
pub struct AmqpTaskExecutor {
    identity: String,
    connection: Connection,
    channel: Arc<Mutex<Channel>>,
    registered: Mutex<HashSet<String>>,
    request_timeout: Duration,
}

impl AmqpTaskExecutor {
    /// 连接到指定Broker
    pub async fn connect(
        url: &str,
        identity: impl Into<String>,
        request_timeout: Duration,
    ) -> SchedulerResult<Self> {
        let connection = timeout(
            request_timeout,
            Connection::connect(url, ConnectionProperties::default()),
        )
        .await
        .map_err(|_| SchedulerError::MessageQueue("连接Broker超时".to_string()))?
        .map_err(|e| SchedulerError::MessageQueue(format!("连接Broker失败: {e}")))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("创建通道失败: {e}")))?;

        let identity = identity.into();
        info!("任务执行器 {} 已连接", identity);

        Ok(Self {
            identity,
            connection,
            channel: Arc::new(Mutex::new(channel)),
            registered: Mutex::new(HashSet::new()),
            request_timeout,
        })
    }

    /// 获取连接状态
    pub fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }

    /// 关闭连接
    pub async fn close(&self) -> SchedulerResult<()> {
        self.connection
            .close(200, "正常关闭")
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("关闭连接失败: {e}")))?;
        info!("任务执行器 {} 的连接已关闭", self.identity);
        Ok(())
    }
}

#[async_trait]
impl TaskExecutor for AmqpTaskExecutor {
    fn identity(&self) -> &str {
        &self.identity
    }

    /// 声明任务标识对应的交换机、队列和绑定（重复注册为no-op）
    async fn register_task(&self, task: &TaskIdentity) -> SchedulerResult<()> {
        {
            let registered = self.registered.lock().await;
            if registered.contains(&task.name) {
                return Ok(());
            }
        }

        let channel = self.channel.lock().await;
        let routing = &task.routing;

        channel
            .exchange_declare(
                &routing.exchange,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                SchedulerError::MessageQueue(format!("声明交换机 {} 失败: {e}", routing.exchange))
            })?;

        channel
            .queue_declare(
                &routing.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                SchedulerError::MessageQueue(format!("声明队列 {} 失败: {e}", routing.queue))
            })?;

        channel
            .queue_bind(
                &routing.queue,
                &routing.exchange,
                &routing.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                SchedulerError::MessageQueue(format!("绑定队列 {} 失败: {e}", routing.queue))
            })?;

        debug!("任务标识 {} 的路由已就绪", task.name);
        self.registered.lock().await.insert(task.name.clone());
        Ok(())
    }

    async fn unregister_task(&self, name: &str) -> SchedulerResult<()> {
        self.registered.lock().await.remove(name);
        Ok(())
    }

    async fn send(&self, message: &TaskMessage) -> SchedulerResult<DispatchReceipt> {
        let payload = serde_json::to_vec(message)
            .map_err(|e| SchedulerError::Serialization(format!("序列化触发消息失败: {e}")))?;

        let mut properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(2); // persistent

        if let Some(priority) = message.priority {
            properties = properties.with_priority(priority.clamp(0, 255) as u8);
        }
        if let Some(expires) = message.expires {
            let remaining_ms = (expires - message.run_date).num_milliseconds();
            if remaining_ms > 0 {
                properties = properties.with_expiration(remaining_ms.to_string().into());
            }
        }

        let channel = self.channel.lock().await;
        let publish = async {
            channel
                .basic_publish(
                    &message.routing.exchange,
                    &message.routing.routing_key,
                    BasicPublishOptions::default(),
                    &payload,
                    properties,
                )
                .await
                .map_err(|e| SchedulerError::DispatchFailed(format!("发布触发消息失败: {e}")))?
                .await
                .map_err(|e| SchedulerError::DispatchFailed(format!("等待发布确认失败: {e}")))
        };

        timeout(self.request_timeout, publish)
            .await
            .map_err(|_| SchedulerError::DispatchFailed("发布触发消息超时".to_string()))??;

        Ok(DispatchReceipt {
            sched_id: message.sched_id,
            queue: message.routing.queue.clone(),
        })
    }
}

/// 备用Broker执行器工厂
pub struct AmqpExecutorFactory {
    request_timeout: Duration,
}

impl AmqpExecutorFactory {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

#[async_trait]
impl ExecutorFactory for AmqpExecutorFactory {
    async fn create(
        &self,
        destination: &DestinationConfig,
    ) -> SchedulerResult<Arc<dyn TaskExecutor>> {
        let executor = AmqpTaskExecutor::connect(
            &destination.as_url(),
            destination.cache_key(),
            self.request_timeout,
        )
        .await?;
        Ok(Arc::new(executor))
    }
}
