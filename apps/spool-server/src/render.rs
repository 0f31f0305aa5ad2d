use std::sync::Arc;

use async_trait::async_trait;
use image::GrayImage;
use serde_json::Value;
use spool_events::Bus;
use spool_topics as topics;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::jobs::JobStore;
use crate::raster;

/// Produces the grayscale receipt image for an order payload. The
/// production implementation templates HTML and rasterizes it in a
/// headless browser; that lives outside this service, behind this seam.
#[async_trait]
pub trait ReceiptRenderer: Send + Sync {
    async fn render(&self, order: &Value) -> anyhow::Result<GrayImage>;
}

/// Fallback renderer used when no external rasterizer is wired up:
/// a blank receipt with rule lines, sized by the order's item count. Keeps
/// the dispatch pipeline (and the printers) exercisable end to end.
pub struct PlaceholderRenderer;

#[async_trait]
impl ReceiptRenderer for PlaceholderRenderer {
    async fn render(&self, order: &Value) -> anyhow::Result<GrayImage> {
        let items = order
            .get("items")
            .and_then(|v| v.as_array())
            .map(|a| a.len() as u32)
            .unwrap_or(0);
        let height = 96 + items * 24;
        let mut img = GrayImage::from_pixel(raster::RECEIPT_WIDTH, height, image::Luma([255u8]));
        for x in 0..img.width() {
            img.put_pixel(x, 0, image::Luma([0u8]));
            img.put_pixel(x, height - 1, image::Luma([0u8]));
        }
        Ok(img)
    }
}

/// Asynchronous producer of raster bytes. `submit` returns immediately;
/// a bounded number of renders run concurrently and completions re-enter
/// the job store through its public API only.
pub struct RenderBroker {
    renderer: Arc<dyn ReceiptRenderer>,
    permits: Arc<Semaphore>,
    jobs: Arc<JobStore>,
    bus: Bus,
}

impl RenderBroker {
    pub fn new(
        renderer: Arc<dyn ReceiptRenderer>,
        concurrency: usize,
        jobs: Arc<JobStore>,
        bus: Bus,
    ) -> Arc<Self> {
        Arc::new(Self {
            renderer,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            jobs,
            bus,
        })
    }

    /// Render one order and fan the resulting bytes out to every token.
    /// Never blocks the caller; the shared buffer is attached to each job
    /// on success, and each job is failed on a terminal render error.
    pub fn submit(self: &Arc<Self>, order: Value, tokens: Vec<String>) {
        let broker = Arc::clone(self);
        tokio::spawn(async move {
            let _permit = match broker.permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return, // semaphore closed: shutting down
            };
            let result = broker
                .renderer
                .render(&order)
                .await
                .and_then(|img| raster::finalize_receipt(&img));
            match result {
                Ok(bytes) => {
                    debug!(
                        tokens = tokens.len(),
                        bytes = bytes.len(),
                        "render completed"
                    );
                    for token in &tokens {
                        broker.jobs.attach_content(token, bytes.clone()).await;
                        broker.bus.publish(
                            topics::TOPIC_RENDER_COMPLETED,
                            &serde_json::json!({"token": token, "bytes": bytes.len()}),
                        );
                    }
                }
                Err(err) => {
                    warn!(%err, tokens = tokens.len(), "render failed");
                    for token in &tokens {
                        broker.jobs.mark_render_failed(token).await;
                        broker.bus.publish(
                            topics::TOPIC_RENDER_FAILED,
                            &serde_json::json!({"token": token, "error": err.to_string()}),
                        );
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::OrderMeta;
    use serde_json::json;
    use std::time::Duration;

    struct FailingRenderer;

    #[async_trait]
    impl ReceiptRenderer for FailingRenderer {
        async fn render(&self, _order: &Value) -> anyhow::Result<GrayImage> {
            anyhow::bail!("browser crashed")
        }
    }

    async fn wait_for<F, Fut>(mut probe: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..100 {
            if probe().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached within 1s");
    }

    #[tokio::test]
    async fn fan_out_attaches_one_shared_buffer_to_all_tokens() {
        let jobs = JobStore::new();
        let bus = Bus::new(8);
        let now = chrono::Utc::now();
        let a = jobs.create("tA", OrderMeta::default(), now).await;
        let b = jobs.create("tB", OrderMeta::default(), now).await;
        let broker = RenderBroker::new(Arc::new(PlaceholderRenderer), 2, jobs.clone(), bus);

        broker.submit(json!({"items": [1, 2]}), vec![a.clone(), b.clone()]);
        let jobs2 = jobs.clone();
        let (a2, b2) = (a.clone(), b.clone());
        wait_for(move || {
            let jobs = jobs2.clone();
            let (a, b) = (a2.clone(), b2.clone());
            async move {
                jobs.peek(&a).await.unwrap().content.is_some()
                    && jobs.peek(&b).await.unwrap().content.is_some()
            }
        })
        .await;

        let ca = jobs.peek(&a).await.unwrap().content.unwrap();
        let cb = jobs.peek(&b).await.unwrap().content.unwrap();
        assert_eq!(ca, cb, "fan-out shares one rendering");
        assert_eq!(&ca[ca.len() - 3..], &raster::CUT_SEQUENCE);
    }

    #[tokio::test]
    async fn terminal_render_error_fails_the_jobs() {
        let jobs = JobStore::new();
        let bus = Bus::new(8);
        let mut events = bus.subscribe();
        let now = chrono::Utc::now();
        let token = jobs.create("tA", OrderMeta::default(), now).await;
        let broker = RenderBroker::new(Arc::new(FailingRenderer), 2, jobs.clone(), bus);

        broker.submit(json!({}), vec![token.clone()]);
        let jobs2 = jobs.clone();
        let t2 = token.clone();
        wait_for(move || {
            let jobs = jobs2.clone();
            let token = t2.clone();
            async move { jobs.peek(&token).await.unwrap().status.stage() == "failed" }
        })
        .await;

        let env = events.recv().await.unwrap();
        assert_eq!(env.kind, topics::TOPIC_RENDER_FAILED);
        assert_eq!(env.payload["token"], token.as_str());
    }
}
