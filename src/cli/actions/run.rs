use super::{Action, ProbeSettings};
use crate::{exporter::Exporter, targets, tls::TrustAnchors};
use anyhow::Result;

/// Execute the action's business logic by delegating to the appropriate module
pub async fn execute(action: Action) -> Result<()> {
    match action {
        Action::Serve {
            settings,
            listen,
            port,
        } => {
            let exporter = build(settings).await?;
            crate::exporter::start(exporter, listen, port).await
        }
        Action::Once { settings } => {
            let exporter = build(settings).await?;
            for line in exporter.report().await? {
                println!("{line}");
            }
            Ok(())
        }
    }
}

/// Load trust anchors and targets once, before any probe runs
async fn build(settings: ProbeSettings) -> Result<Exporter> {
    let anchors = TrustAnchors::load(&settings.ca_file).await?;
    let targets = targets::collect(settings.config.as_deref(), settings.targets).await?;

    Ok(Exporter::new(targets, anchors, settings.concurrency))
}
