use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::current_time;
use super::encoders::encode_family;
use super::encoders::EncodingRules;
use super::family::MetricFamily;
use super::queue::QueueConsumer;
use crate::delivery::LineSink;
use crate::logging::LINES_TARGET;

/// What happened to one dequeued family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Delivered { lines: usize },
    /// filtered out by name or left without any line
    Skipped,
    Failed,
}

/// Consumer side of the pipeline: dequeue, encode, deliver.
///
/// A failed delivery drops that family's lines and moves on to the next one.
pub struct Pusher<D> {
    rules: Arc<EncodingRules>,
    sink: D,
    consumer: QueueConsumer<MetricFamily>,
}

impl<D: LineSink> Pusher<D> {
    pub fn new(rules: Arc<EncodingRules>, sink: D, consumer: QueueConsumer<MetricFamily>) -> Self {
        Self {
            rules,
            sink,
            consumer,
        }
    }

    /// Run until `token` is cancelled or every queue producer is gone.
    pub async fn run(mut self, token: CancellationToken) {
        info!("Pusher started");
        loop {
            let family = tokio::select! {
                _ = token.cancelled() => break,
                family = self.consumer.take() => family,
            };
            let Some(family) = family else {
                info!("Queue closed");
                break;
            };
            self.push(&family).await;
        }
        info!("Pusher stopped");
    }

    pub async fn push(&self, family: &MetricFamily) -> PushOutcome {
        let encoded = encode_family(&self.rules, family, current_time());
        for report in &encoded.rejected {
            warn!("Dropping sample: {report:?}");
        }
        if !encoded.accepted {
            debug!(
                family = %family.name,
                kind = family.kind.as_str(),
                "Metric family filtered out"
            );
            return PushOutcome::Skipped;
        }
        if encoded.lines.is_empty() {
            debug!(
                family = %family.name,
                kind = family.kind.as_str(),
                "Nothing to forward"
            );
            return PushOutcome::Skipped;
        }

        for line in &encoded.lines {
            tracing::info!(target: LINES_TARGET, line = %line);
        }

        match self.sink.deliver(&encoded.lines).await {
            Ok(()) => {
                debug!(family = %family.name, lines = encoded.lines.len(), "Delivered");
                PushOutcome::Delivered {
                    lines: encoded.lines.len(),
                }
            }
            Err(report) => {
                error!(family = %family.name, "Delivery failed, dropping lines: {report:?}");
                PushOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use error_stack::Report;
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::delivery::DeliveryError;
    use crate::metrics::encoders::PatternList;
    use crate::metrics::encoders::WireLine;
    use crate::metrics::family::FamilyKind;
    use crate::metrics::family::ScalarSample;
    use crate::metrics::queue;

    /// Records every body and answers with a scripted status per call.
    #[derive(Clone, Default)]
    struct RecordingSink {
        bodies: Arc<Mutex<Vec<Vec<String>>>>,
        failing_calls: Arc<Mutex<Vec<usize>>>,
    }

    impl RecordingSink {
        fn failing_on(calls: &[usize]) -> Self {
            Self {
                failing_calls: Arc::new(Mutex::new(calls.to_vec())),
                ..Default::default()
            }
        }

        fn bodies(&self) -> Vec<Vec<String>> {
            self.bodies.lock().expect("poisoned").clone()
        }
    }

    impl LineSink for RecordingSink {
        async fn deliver(&self, lines: &[WireLine]) -> Result<(), Report<DeliveryError>> {
            let call = {
                let mut bodies = self.bodies.lock().expect("poisoned");
                bodies.push(lines.iter().map(ToString::to_string).collect());
                bodies.len()
            };
            if self.failing_calls.lock().expect("poisoned").contains(&call) {
                return Err(Report::new(DeliveryError::Status {
                    status: 503,
                    body: "unavailable".into(),
                }));
            }
            Ok(())
        }
    }

    fn gauge(name: &str, value: &str) -> MetricFamily {
        MetricFamily::new(name, FamilyKind::Gauge)
            .with_sample(ScalarSample::new([("host", "x")], value))
    }

    #[test(tokio::test)]
    async fn excluded_family_causes_no_delivery() {
        let rules = EncodingRules {
            metrics_included: PatternList::new(["^cpu_"]).expect("valid"),
            ..Default::default()
        };
        let sink = RecordingSink::default();
        let (_producer, consumer) = queue::bounded(1);
        let pusher = Pusher::new(Arc::new(rules), sink.clone(), consumer);

        assert_eq!(pusher.push(&gauge("mem_usage", "1")).await, PushOutcome::Skipped);
        assert!(sink.bodies().is_empty());
    }

    #[test(tokio::test)]
    async fn family_without_lines_is_not_posted() {
        let sink = RecordingSink::default();
        let (_producer, consumer) = queue::bounded(1);
        let pusher = Pusher::new(Arc::new(EncodingRules::default()), sink.clone(), consumer);

        assert_eq!(pusher.push(&gauge("bad_metric", "NaNtext")).await, PushOutcome::Skipped);
        assert!(sink.bodies().is_empty());
    }

    #[test(tokio::test)]
    async fn failed_delivery_does_not_stop_the_loop() {
        let sink = RecordingSink::failing_on(&[1]);
        let (producer, consumer) = queue::bounded(4);
        let pusher = Pusher::new(Arc::new(EncodingRules::default()), sink.clone(), consumer);

        producer.put(gauge("first", "1")).await.expect("enqueue");
        producer.put(gauge("second", "2")).await.expect("enqueue");
        drop(producer);
        pusher.run(CancellationToken::new()).await;

        let bodies = sink.bodies();
        assert_eq!(bodies.len(), 2, "second family must still be delivered");
        assert!(bodies[0][0].starts_with("metric=first  host=x 1.000000 "));
        assert!(bodies[1][0].starts_with("metric=second  host=x 2.000000 "));
    }

    #[test(tokio::test)]
    async fn lines_of_one_family_share_a_timestamp() {
        let sink = RecordingSink::default();
        let (_producer, consumer) = queue::bounded(1);
        let pusher = Pusher::new(Arc::new(EncodingRules::default()), sink.clone(), consumer);
        let family = MetricFamily::new("m", FamilyKind::Gauge)
            .with_sample(ScalarSample::new([("a", "1")], "1"))
            .with_sample(ScalarSample::new([("a", "2")], "2"))
            .with_sample(ScalarSample::new([("a", "3")], "3"));

        assert_eq!(pusher.push(&family).await, PushOutcome::Delivered { lines: 3 });
        let body = &sink.bodies()[0];
        let stamps: Vec<&str> = body
            .iter()
            .map(|line| line.rsplit(' ').next().expect("timestamp"))
            .collect();
        assert!(stamps.windows(2).all(|w| w[0] == w[1]), "{stamps:?}");
    }
}
