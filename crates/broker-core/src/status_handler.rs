//! Asynchronous handler for the indirect (reactor-routed) status notifier.
//!
//! Runs on its own task, fed through the reactor's async hub. Each inbound
//! message is a flat `key, value, key, value, ...` frame list; `type` and
//! `id` are pulled out to build the request path, the rest become form
//! fields.

use broker_transport::{HubEndpoint, TERMINATE};

/// Drive the hub endpoint until a terminate sentinel arrives or the channel
/// closes.
pub async fn run_status_notifier_handler(mut endpoint: HubEndpoint, config: broker_config::NotifierConfig) {
    let client = match reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()
    {
        Ok(c) => c,
        Err(err) => {
            tracing::error!(error = %err, "failed to build notifier http client; handler exiting");
            return;
        }
    };
    let base = format!("{}:{}", config.address, config.port);

    while let Some(message) = endpoint.inbound.recv().await {
        if message.command() == Some(TERMINATE) {
            return;
        }

        let mut kind: Option<String> = None;
        let mut id: Option<String> = None;
        let mut fields: Vec<(String, String)> = Vec::new();

        let mut frames = message.data.iter();
        while let (Some(k), Some(v)) = (frames.next(), frames.next()) {
            let k = String::from_utf8_lossy(k).into_owned();
            let v = String::from_utf8_lossy(v).into_owned();
            match k.as_str() {
                "type" => kind = Some(v),
                "id" => id = Some(v),
                _ => fields.push((k, v)),
            }
        }

        let mut url = base.clone();
        if let Some(kind) = &kind {
            url.push('/');
            url.push_str(kind);
        }
        if let Some(id) = &id {
            url.push('/');
            url.push_str(id);
        }

        let field_refs: Vec<(&str, &str)> = fields.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        let mut req = client.post(&url).form(&field_refs);
        if let Some(username) = &config.username {
            req = req.basic_auth(username, config.password.as_deref());
        }

        match req.send().await {
            Ok(resp) if !resp.status().is_success() => {
                tracing::error!(url, status = %resp.status(), "status notifier request rejected");
            }
            Ok(_) => {}
            Err(err) => tracing::error!(url, error = %err, "status notifier request failed"),
        }
    }
}
