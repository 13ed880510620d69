/// Image availability check before any container starts

use crate::config::InferenceConfig;
use crate::pipeline::OperatorConfig;
use crate::runtime::docker::ContainerRuntime;
use anyhow::{Context, Result};
use std::collections::BTreeSet;

/// Every image the run may start, without duplicates, in first-use order
pub fn images_needed(operators: &[OperatorConfig], inference: &InferenceConfig) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut images = Vec::new();
    let mut push = |image: &str| {
        if seen.insert(image.to_string()) {
            images.push(image.to_string());
        }
    };

    for operator in operators {
        push(&operator.image);
        for service in &operator.services {
            push(&service.image);
        }
    }
    if operators.iter().any(|op| !op.models.is_empty()) {
        push(&inference.image);
    }
    images
}

/// Look each needed image up locally and pull the ones that are missing.
pub async fn ensure_images<R>(
    runtime: &R,
    operators: &[OperatorConfig],
    inference: &InferenceConfig,
) -> Result<()>
where
    R: ContainerRuntime + ?Sized,
{
    tracing::info!("📦 Checking for container images and tags needed for the pipeline...");
    for image in images_needed(operators, inference) {
        tracing::debug!("Checking if `{}` is in local images...", image);
        if runtime.image_exists(&image).await? {
            tracing::debug!("`{}` found.", image);
            continue;
        }
        tracing::debug!("`{}` not found, try pulling from registry ...", image);
        runtime
            .pull(&image)
            .await
            .with_context(|| format!("failed to pull `{image}`, please verify runtime access and the pipeline definition"))?;
    }
    tracing::info!("✅ All container images are ready to be used.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::pipeline::ServiceConfig;
    use crate::runtime::testing::FakeRuntime;
    use pretty_assertions::assert_eq;

    fn service(image: &str) -> ServiceConfig {
        ServiceConfig {
            name: "triton".into(),
            image: image.into(),
            args: Vec::new(),
            connections: Default::default(),
        }
    }

    #[test]
    fn inference_image_only_needed_with_models() {
        let inference = Config::default().inference;
        let mut a = OperatorConfig::new("a", "a:1");
        let b = OperatorConfig::new("b", "a:1");
        assert_eq!(images_needed(&[a.clone(), b.clone()], &inference), vec!["a:1"]);

        a.models = vec!["liver".into()];
        assert_eq!(
            images_needed(&[a, b], &inference),
            vec!["a:1".to_string(), inference.image.clone()]
        );
    }

    #[tokio::test]
    async fn pulls_only_missing_images() {
        let inference = Config::default().inference;
        let runtime = FakeRuntime::with_local_images(&["a:1"]);
        let mut a = OperatorConfig::new("a", "a:1");
        a.services = vec![service("svc:2")];
        let b = OperatorConfig::new("b", "b:3");

        ensure_images(&runtime, &[a, b], &inference).await.unwrap();
        assert_eq!(runtime.pulled(), vec!["svc:2".to_string(), "b:3".to_string()]);
    }
}
