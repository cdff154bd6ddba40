use serde_json::{Value, json};

use super::{DesiredSpec, validate_identity};
use crate::error::{Error, Result};
use crate::params::{ImageParams, ImageSourceType};

pub const DESCRIPTION_ANNOTATION: &str = "field.cattle.io/description";
pub const STORAGE_CLASS_ANNOTATION: &str = "harvesterhci.io/storageClassName";

pub fn build(params: &ImageParams) -> Result<DesiredSpec> {
    let identity = params.identity();
    validate_identity(&identity)?;

    let source = params.source_type.unwrap_or_default();
    match (source, &params.url) {
        (ImageSourceType::Download, None) => {
            return Err(Error::invalid("url is required for download images"));
        }
        (ImageSourceType::Download, Some(url)) => {
            let parsed = reqwest::Url::parse(url)
                .map_err(|e| Error::invalid(format!("url '{url}': {e}")))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(Error::invalid(format!("url '{url}' must be http or https")));
            }
        }
        (ImageSourceType::Upload, Some(_)) => {
            return Err(Error::invalid("url cannot be combined with upload images"));
        }
        (ImageSourceType::Upload, None) => {}
    }
    if params.display_name.as_deref() == Some("") {
        return Err(Error::invalid("display_name cannot be empty"));
    }

    let mut desired = DesiredSpec::new(identity);
    desired.set_labels(&["metadata", "labels"], &params.labels);
    if let Some(description) = &params.description {
        desired.set(
            &["metadata", "annotations", DESCRIPTION_ANNOTATION],
            Value::String(description.clone()),
        );
    }
    if let Some(class) = &params.storage_class {
        desired.set(
            &["metadata", "annotations", STORAGE_CLASS_ANNOTATION],
            Value::String(class.clone()),
        );
    }

    desired.set_or_default(
        &["spec", "displayName"],
        params.display_name.clone().map(Value::String),
        Value::String(params.name.clone()),
    );
    desired.set_or_default(
        &["spec", "sourceType"],
        params.source_type.map(|s| json!(s.as_str())),
        json!(source.as_str()),
    );
    if let Some(url) = &params.url {
        desired.set(&["spec", "url"], Value::String(url.clone()));
    }
    Ok(desired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{ConnectionParams, Presence};
    use crate::spec::FieldPath;

    fn params() -> ImageParams {
        ImageParams {
            connection: ConnectionParams {
                host: "https://harvester.local".into(),
                token: Some("t".into()),
                username: None,
                password: None,
                verify_ssl: true,
                timeout: 30,
                poll_interval: None,
                poll_attempts: None,
            },
            name: "ubuntu-22.04".into(),
            namespace: "default".into(),
            state: Presence::Present,
            url: Some("https://cloud-images.ubuntu.com/jammy/current/jammy.img".into()),
            display_name: None,
            description: None,
            source_type: None,
            storage_class: None,
            labels: None,
            check_mode: false,
        }
    }

    #[test]
    fn download_image_defaults() {
        let desired = build(&params()).unwrap();
        let doc = &desired.document;
        assert_eq!(doc["kind"], "VirtualMachineImage");
        assert_eq!(doc["spec"]["displayName"], "ubuntu-22.04");
        assert_eq!(doc["spec"]["sourceType"], "download");
        assert!(
            desired
                .policy
                .create_only
                .contains(&FieldPath::new(["spec", "displayName"]))
        );
    }

    #[test]
    fn download_requires_url() {
        let mut p = params();
        p.url = None;
        assert!(matches!(build(&p), Err(Error::InvalidSpec(_))));

        p.source_type = Some(ImageSourceType::Upload);
        assert!(build(&p).is_ok());
    }

    #[test]
    fn storage_class_and_description_are_annotations() {
        let mut p = params();
        p.storage_class = Some("longhorn-ssd".into());
        p.description = Some("Jammy".into());
        let desired = build(&p).unwrap();
        let annotations = &desired.document["metadata"]["annotations"];
        assert_eq!(annotations[STORAGE_CLASS_ANNOTATION], "longhorn-ssd");
        assert_eq!(annotations[DESCRIPTION_ANNOTATION], "Jammy");
    }
}
