use anyhow::{Context, anyhow};
use retrace_common::condition::SuccessCondition;
use retrace_common::locator::LocatorBundle;
use retrace_common::step::RecordedStep;
use retrace_engine::config::{ConfigLoader, RetraceConfig};
use retrace_engine::formatter;
use retrace_engine::replay::RecordingPerformer;
use retrace_engine::{
    Clock, CorrectionStore, DomAccessor, FeatureExtractor, Resolver, SnapshotDom, StepReplayer,
    SystemClock, Verifier,
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// A bare bundle, or a recorded step whose bundle is used.
#[derive(Deserialize)]
#[serde(untagged)]
enum BundleInput {
    Step(Box<RecordedStep>),
    Bundle(LocatorBundle),
}

/// One step or a list of them.
#[derive(Deserialize)]
#[serde(untagged)]
enum StepsInput {
    Many(Vec<RecordedStep>),
    One(Box<RecordedStep>),
}

pub async fn load_config(path: Option<&Path>) -> anyhow::Result<RetraceConfig> {
    let config = match path {
        Some(path) => ConfigLoader::load_from(path)
            .await
            .with_context(|| format!("loading {}", path.display()))?,
        None => ConfigLoader::load_default().await?,
    };
    Ok(config)
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

async fn open_snapshot(path: &Path, clock: Arc<dyn Clock>) -> anyhow::Result<SnapshotDom> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let dom = SnapshotDom::load(&content, clock)
        .with_context(|| format!("loading snapshot {}", path.display()))?;
    Ok(dom)
}

fn print<T: serde::Serialize>(
    value: &T,
    json: bool,
    text: impl FnOnce() -> String,
) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{}", text().trim_end());
    }
    Ok(())
}

pub async fn extract(snapshot: &Path, selector: &str, json: bool) -> anyhow::Result<bool> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let dom = open_snapshot(snapshot, clock).await?;
    let root = dom.document_root().await?;
    let node = dom
        .query_selector_all(selector, root)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("no element matches '{}'", selector))?;

    let bundle = FeatureExtractor::new(&dom).extract(node).await?;
    print(&bundle, json, || formatter::format_bundle(&bundle))?;
    Ok(true)
}

pub async fn resolve(
    config: &RetraceConfig,
    snapshot: &Path,
    bundle: &Path,
    timeout_ms: Option<u64>,
    json: bool,
) -> anyhow::Result<bool> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let dom = open_snapshot(snapshot, clock.clone()).await?;
    let bundle = match read_json::<BundleInput>(bundle).await? {
        BundleInput::Step(step) => step.payload.effective_bundle(),
        BundleInput::Bundle(bundle) => bundle,
    };

    let mut options = config.resolver.options();
    options.require_actionable = false;
    if let Some(timeout_ms) = timeout_ms {
        options.timeout_ms = timeout_ms;
    }
    let result = Resolver::new(&dom, clock.as_ref())
        .resolve_scoped(&bundle, &options)
        .await;
    print(&result, json, || formatter::format_resolve(&bundle, &result))?;
    Ok(result.is_found())
}

pub async fn verify(
    config: &RetraceConfig,
    snapshot: &Path,
    condition: &Path,
    json: bool,
) -> anyhow::Result<bool> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let dom = open_snapshot(snapshot, clock.clone()).await?;
    let condition: SuccessCondition = read_json(condition).await?;

    let verifier = Verifier::new(config.wait.waiter(&dom, clock.as_ref()));
    let result = verifier.verify(&condition, None).await;
    print(&result, json, || formatter::format_verification(&result))?;
    Ok(result.passed)
}

pub async fn replay(
    config: RetraceConfig,
    snapshot: &Path,
    steps: &Path,
    json: bool,
) -> anyhow::Result<bool> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let dom = open_snapshot(snapshot, clock.clone()).await?;
    let steps = match read_json::<StepsInput>(steps).await? {
        StepsInput::Many(steps) => steps,
        StepsInput::One(step) => vec![*step],
    };
    info!("Replaying {} steps", steps.len());

    let performer = RecordingPerformer::new();
    let store = CorrectionStore::new();
    let report = StepReplayer::new(&dom, clock.as_ref(), &performer, &store)
        .with_config(config)
        .replay_workflow(&steps)
        .await;
    print(&report, json, || formatter::format_workflow(&report))?;
    Ok(report.succeeded())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const PAGE: &str = r#"{
        "url": "https://app.test/edit",
        "root": {
            "tag": "body",
            "children": [
                {"tag": "input", "attributes": {"name": "title"}},
                {"tag": "button", "attributes": {"data-testid": "save"}, "text": "Save"}
            ]
        }
    }"#;

    fn file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", content).unwrap();
        file
    }

    #[tokio::test]
    async fn test_load_config_from_path() {
        let config = file("resolver:\n  timeout_ms: 250\n");
        let config = load_config(Some(config.path())).await.unwrap();
        assert_eq!(config.resolver.timeout_ms, 250);
    }

    #[tokio::test]
    async fn test_extract_then_resolve_from_files() {
        let snapshot = file(PAGE);
        assert!(extract(snapshot.path(), "button", true).await.unwrap());
        assert!(extract(snapshot.path(), "table", true).await.is_err());

        let bundle = file(r#"{"strategies": [{"kind": "TEST_ID", "value": "data-testid=save"}]}"#);
        let config = RetraceConfig::default();
        let found = resolve(&config, snapshot.path(), bundle.path(), Some(0), true)
            .await
            .unwrap();
        assert!(found);
    }

    #[tokio::test]
    async fn test_replay_accepts_a_single_step() {
        let snapshot = file(PAGE);
        let step = file(r#"{"id": "save", "type": "click", "payload": {"selector": "button"}}"#);
        let ok = replay(RetraceConfig::default(), snapshot.path(), step.path(), true)
            .await
            .unwrap();
        assert!(ok);
    }
}
