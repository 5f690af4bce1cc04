//! Outbound status reporting to the frontend. Two implementations of the
//! same trait: a direct HTTP client running on its own task, and an indirect
//! one that hands events to the reactor's async hub instead.
//!
//! Both run off the dispatch thread — even the "direct" HTTP form only ever
//! enqueues onto a channel from [`StatusNotifier`] methods; the actual POST
//! happens on a background task, so a stalled frontend can never stall
//! dispatch.

use broker_transport::Message;
use tokio::sync::mpsc;

/// Events the broker reports to the frontend.
pub trait StatusNotifier {
    /// An inconsistency was detected (e.g. a worker re-`init`ed with
    /// different headers). Not tied to any one job.
    fn error(&mut self, desc: &str);
    /// A job completed successfully.
    fn job_done(&mut self, job_id: &str);
    /// A job completed with a non-OK status.
    fn job_failed(&mut self, job_id: &str, desc: &str);
    /// A job could not be reassigned after its worker died.
    fn rejected_job(&mut self, job_id: &str, desc: &str);
    /// A batch of jobs could not be reassigned after their shared worker
    /// died; equivalent to calling [`StatusNotifier::rejected_job`] once per
    /// id with the same `desc`.
    fn rejected_jobs(&mut self, job_ids: &[&str], desc: &str);
}

const TYPE_ERROR: &str = "error";
const TYPE_JOB_STATUS: &str = "job-status";

/// One fact to report, queued from the dispatch thread and drained by the
/// HTTP background task.
#[derive(Debug, Clone)]
enum NotifyEvent {
    Error { desc: String },
    JobDone { job_id: String },
    JobFailed { job_id: String, desc: String },
    RejectedJob { job_id: String, desc: String },
}

/// Direct HTTP implementation: POSTs to the frontend's REST API from a
/// dedicated background task.
pub struct HttpStatusNotifier {
    tx: mpsc::UnboundedSender<NotifyEvent>,
}

impl HttpStatusNotifier {
    /// Spawn the background POST task and return a handle to it.
    pub fn spawn(config: broker_config::NotifierConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_http_notifier(config, rx));
        Self { tx }
    }

    fn send(&self, event: NotifyEvent) {
        if self.tx.send(event).is_err() {
            tracing::error!("status notifier background task is gone; event dropped");
        }
    }
}

impl StatusNotifier for HttpStatusNotifier {
    fn error(&mut self, desc: &str) {
        self.send(NotifyEvent::Error { desc: desc.to_string() });
    }

    fn job_done(&mut self, job_id: &str) {
        self.send(NotifyEvent::JobDone { job_id: job_id.to_string() });
    }

    fn job_failed(&mut self, job_id: &str, desc: &str) {
        self.send(NotifyEvent::JobFailed {
            job_id: job_id.to_string(),
            desc: desc.to_string(),
        });
    }

    fn rejected_job(&mut self, job_id: &str, desc: &str) {
        self.send(NotifyEvent::RejectedJob {
            job_id: job_id.to_string(),
            desc: desc.to_string(),
        });
    }

    fn rejected_jobs(&mut self, job_ids: &[&str], desc: &str) {
        for job_id in job_ids {
            self.rejected_job(job_id, desc);
        }
    }
}

async fn run_http_notifier(
    config: broker_config::NotifierConfig,
    mut rx: mpsc::UnboundedReceiver<NotifyEvent>,
) {
    let client = match reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()
    {
        Ok(c) => c,
        Err(err) => {
            tracing::error!(error = %err, "failed to build notifier http client; notifier disabled");
            return;
        }
    };
    let base = format!("{}:{}", config.address, config.port);

    while let Some(event) = rx.recv().await {
        let result = match &event {
            NotifyEvent::Error { desc } => {
                post(&client, &config, &format!("{base}/error"), &[("message", desc.as_str())]).await
            }
            NotifyEvent::JobDone { job_id } => {
                post(
                    &client,
                    &config,
                    &format!("{base}/job-status/{job_id}"),
                    &[("status", "OK")],
                )
                .await
            }
            NotifyEvent::JobFailed { job_id, desc } => {
                post(
                    &client,
                    &config,
                    &format!("{base}/job-status/{job_id}"),
                    &[("status", "FAILED"), ("message", desc.as_str())],
                )
                .await
            }
            NotifyEvent::RejectedJob { job_id, desc } => {
                post(
                    &client,
                    &config,
                    &format!("{base}/job-status/{job_id}"),
                    &[("status", "FAILED"), ("message", desc.as_str())],
                )
                .await
            }
        };

        if let Err(err) = result {
            tracing::error!(error = %err, ?event, "status notifier request failed");
        }
    }
}

async fn post(
    client: &reqwest::Client,
    config: &broker_config::NotifierConfig,
    url: &str,
    fields: &[(&str, &str)],
) -> anyhow::Result<()> {
    let mut req = client.post(url).form(fields);
    if let Some(username) = &config.username {
        req = req.basic_auth(username, config.password.as_deref());
    }
    let resp = req.send().await?;
    if !resp.status().is_success() {
        anyhow::bail!("notifier request to {url} failed with status {}", resp.status());
    }
    Ok(())
}

/// Indirect implementation: hands events to the reactor as `status_notifier`
/// messages, to be picked up by the async status-notifier handler.
pub struct ReactorStatusNotifier<'a> {
    responses: &'a mut Vec<Message>,
    key: &'static str,
}

impl<'a> ReactorStatusNotifier<'a> {
    /// Build a notifier that appends to `responses` under `key` (normally
    /// `"status_notifier"`). Constructed fresh per handled message.
    pub fn new(responses: &'a mut Vec<Message>, key: &'static str) -> Self {
        Self { responses, key }
    }

    fn emit(&mut self, fields: &[(&str, &str)]) {
        let mut frames = Vec::with_capacity(fields.len() * 2);
        for (k, v) in fields {
            frames.push(k.as_bytes().to_vec());
            frames.push(v.as_bytes().to_vec());
        }
        self.responses.push(Message::new(self.key, Vec::new(), frames));
    }
}

impl StatusNotifier for ReactorStatusNotifier<'_> {
    fn error(&mut self, desc: &str) {
        self.emit(&[("type", TYPE_ERROR), ("message", desc)]);
    }

    fn job_done(&mut self, job_id: &str) {
        self.emit(&[("type", TYPE_JOB_STATUS), ("id", job_id), ("status", "OK")]);
    }

    fn job_failed(&mut self, job_id: &str, desc: &str) {
        self.emit(&[
            ("type", TYPE_JOB_STATUS),
            ("id", job_id),
            ("status", "FAILED"),
            ("message", desc),
        ]);
    }

    fn rejected_job(&mut self, job_id: &str, desc: &str) {
        self.emit(&[
            ("type", TYPE_JOB_STATUS),
            ("id", job_id),
            ("status", "FAILED"),
            ("message", desc),
        ]);
    }

    fn rejected_jobs(&mut self, job_ids: &[&str], desc: &str) {
        for job_id in job_ids {
            self.rejected_job(job_id, desc);
        }
    }
}
