//! Fakes shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use dlq_worker::{
    Disposition, GatewayError, Message, MessageSource, MetricsGateway, SubscriptionId,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

pub const PROJECT: &str = "jojo-project";

pub fn ids(names: &[&str]) -> Vec<SubscriptionId> {
    names.iter().map(|n| SubscriptionId::from(*n)).collect()
}

/// One scripted response to `pull`.
pub enum Pull {
    Deliver(Message),
    Fail(&'static str),
    /// Never returns
    Hang,
}

/// Scripted message source that reports every ack/nack call on a channel.
pub struct FakeSource {
    script: Mutex<VecDeque<Pull>>,
    pulls: AtomicUsize,
    settled: mpsc::UnboundedSender<(String, Disposition)>,
    fail_settle: bool,
}

impl FakeSource {
    pub fn new(script: Vec<Pull>) -> (Self, mpsc::UnboundedReceiver<(String, Disposition)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let source = Self {
            script: Mutex::new(script.into()),
            pulls: AtomicUsize::new(0),
            settled: tx,
            fail_settle: false,
        };
        (source, rx)
    }

    /// Make every ack and nack call fail.
    pub fn failing_settle(mut self) -> Self {
        self.fail_settle = true;
        self
    }

    pub fn pulls(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }

    fn record(&self, ack_id: &str, disposition: Disposition) -> Result<(), GatewayError> {
        if self.fail_settle {
            return Err(GatewayError::Api {
                status: 503,
                message: "unavailable".to_string(),
            });
        }
        let _ = self.settled.send((ack_id.to_string(), disposition));
        Ok(())
    }
}

#[async_trait]
impl MessageSource for FakeSource {
    async fn pull(&self) -> Result<Message, GatewayError> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        let step = self.script.lock().unwrap().pop_front();
        match step {
            Some(Pull::Deliver(message)) => Ok(message),
            Some(Pull::Fail(reason)) => Err(GatewayError::other(reason)),
            Some(Pull::Hang) | None => std::future::pending().await,
        }
    }

    async fn ack(&self, ack_id: &str) -> Result<(), GatewayError> {
        self.record(ack_id, Disposition::Acked)
    }

    async fn nack(&self, ack_id: &str) -> Result<(), GatewayError> {
        self.record(ack_id, Disposition::Nacked)
    }

    fn name(&self) -> &str {
        "orders.push.dlq.pull"
    }
}

/// Gateway returning fixed means, recording calls and peak concurrency.
#[derive(Default)]
pub struct FakeGateway {
    means: HashMap<String, f64>,
    failing: Vec<String>,
    panicking: Vec<String>,
    delay: Duration,
    calls: Mutex<Vec<SubscriptionId>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeGateway {
    pub fn with_means(means: &[(&str, f64)]) -> Self {
        Self {
            means: means.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            ..Default::default()
        }
    }

    pub fn failing_on(mut self, subscription: &str) -> Self {
        self.failing.push(subscription.to_string());
        self
    }

    pub fn panicking_on(mut self, subscription: &str) -> Self {
        self.panicking.push(subscription.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<SubscriptionId> {
        self.calls.lock().unwrap().clone()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetricsGateway for FakeGateway {
    async fn list_dlq_subscriptions(
        &self,
        _project_id: &str,
    ) -> Result<Vec<SubscriptionId>, GatewayError> {
        let mut names: Vec<_> = self.means.keys().cloned().collect();
        names.sort();
        Ok(names.into_iter().map(SubscriptionId::from).collect())
    }

    async fn mean_undelivered_messages(
        &self,
        _project_id: &str,
        subscription_id: &SubscriptionId,
    ) -> Result<f64, GatewayError> {
        self.calls.lock().unwrap().push(subscription_id.clone());
        if self.panicking.iter().any(|p| p == subscription_id.as_str()) {
            panic!("gateway blew up on {subscription_id}");
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.iter().any(|f| f == subscription_id.as_str()) {
            return Err(GatewayError::Api {
                status: 500,
                message: "backend error".to_string(),
            });
        }
        Ok(self
            .means
            .get(subscription_id.as_str())
            .copied()
            .unwrap_or(0.0))
    }
}
