//! CloudFormation JSON document target.

use crate::engine::Context;
use crate::error::TargetError;
use crate::target::{Target, TargetKind, TargetOutput, TargetType};
use async_trait::async_trait;
use serde_json::{Value as Json, json};
use std::any::Any;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::info;

/// File name written into the output directory.
pub const CLOUDFORMATION_FILE: &str = "kubernetes.json";

/// Target that accumulates a CloudFormation template.
#[derive(Debug, Default)]
pub struct CloudFormationTarget {
    out_dir: Option<PathBuf>,
    resources: Mutex<BTreeMap<String, Json>>,
    finalized: AtomicBool,
}

impl CloudFormationTarget {
    /// Creates an empty template.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes the template into `dir` on finalize.
    #[must_use]
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.out_dir = Some(dir.into());
        self
    }

    /// Logical ID of a resource: the type without separators followed by
    /// the alphanumeric characters of the name.
    #[must_use]
    pub fn logical_id(resource_type: &str, name: &str) -> String {
        let prefix = resource_type.replace("::", "");
        let suffix: String = name.chars().filter(char::is_ascii_alphanumeric).collect();
        format!("{prefix}{suffix}")
    }

    /// `{"Ref": ...}` to another rendered resource.
    #[must_use]
    pub fn reference(resource_type: &str, name: &str) -> Json {
        json!({ "Ref": Self::logical_id(resource_type, name) })
    }

    /// A `Ref` to a referenced task, or its literal provider ID when the
    /// task is not emitted into the template.
    pub async fn reference_id(ctx: &Context, resource_type: &str, name: &str) -> Json {
        match ctx.ids().id_of(name).await {
            Some(id) => Json::String(id),
            None => Self::reference(resource_type, name),
        }
    }

    /// `{"Fn::GetAtt": [...]}` to an attribute of another rendered resource.
    #[must_use]
    pub fn get_att(resource_type: &str, name: &str, attribute: &str) -> Json {
        json!({ "Fn::GetAtt": [Self::logical_id(resource_type, name), attribute] })
    }

    /// Converts a tag map to the CloudFormation key/value list.
    #[must_use]
    pub fn tags(tags: &BTreeMap<String, String>) -> Json {
        Json::Array(
            tags.iter()
                .map(|(k, v)| json!({ "Key": k, "Value": v }))
                .collect(),
        )
    }

    /// Adds one resource.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateResource` if the logical ID is taken, or
    /// `AlreadyFinalized`.
    pub async fn render_resource(
        &self,
        resource_type: &str,
        name: &str,
        properties: Json,
    ) -> Result<(), TargetError> {
        if self.finalized.load(Ordering::SeqCst) {
            return Err(TargetError::AlreadyFinalized);
        }
        let id = Self::logical_id(resource_type, name);
        let mut resources = self.resources.lock().await;
        if resources.contains_key(&id) {
            return Err(TargetError::DuplicateResource {
                resource_type: resource_type.to_string(),
                name: id,
            });
        }
        resources.insert(id, json!({ "Type": resource_type, "Properties": properties }));
        Ok(())
    }
}

#[async_trait]
impl Target for CloudFormationTarget {
    fn kind(&self) -> TargetKind {
        TargetKind::CloudFormation
    }

    async fn finalize(&self) -> Result<TargetOutput, TargetError> {
        if self.finalized.swap(true, Ordering::SeqCst) {
            return Err(TargetError::AlreadyFinalized);
        }
        let document = {
            let resources = self.resources.lock().await;
            json!({ "Resources": &*resources })
        };
        let contents = serde_json::to_string_pretty(&document)
            .map_err(|e| TargetError::serialization(e.to_string()))?;

        let path = match &self.out_dir {
            Some(dir) => {
                let path = dir.join(CLOUDFORMATION_FILE);
                let io_err = |e: std::io::Error| TargetError::Io {
                    path: path.clone(),
                    message: e.to_string(),
                };
                fs::create_dir_all(dir).await.map_err(io_err)?;
                fs::write(&path, &contents).await.map_err(io_err)?;
                info!("CloudFormation template written to {}", path.display());
                Some(path)
            }
            None => None,
        };

        Ok(TargetOutput::Document {
            format: TargetKind::CloudFormation,
            path,
            contents,
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl TargetType for CloudFormationTarget {
    const KIND: TargetKind = TargetKind::CloudFormation;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logical_id_and_ref() {
        assert_eq!(
            CloudFormationTarget::logical_id("AWS::EC2::VPC", "main.k8s-local"),
            "AWSEC2VPCmaink8slocal"
        );
        assert_eq!(
            CloudFormationTarget::reference("AWS::EC2::Subnet", "a"),
            json!({"Ref": "AWSEC2Subneta"})
        );
    }

    #[tokio::test]
    async fn test_template_shape() {
        let target = CloudFormationTarget::new();
        target
            .render_resource("AWS::EC2::VPC", "main", json!({"CidrBlock": "10.0.0.0/16"}))
            .await
            .unwrap();
        assert!(matches!(
            target.render_resource("AWS::EC2::VPC", "main", json!({})).await,
            Err(TargetError::DuplicateResource { .. })
        ));

        let TargetOutput::Document { path, contents, .. } = target.finalize().await.unwrap() else {
            panic!("expected a document");
        };
        assert!(path.is_none());
        let parsed: Json = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed["Resources"]["AWSEC2VPCmain"]["Type"], "AWS::EC2::VPC");
        assert_eq!(
            parsed["Resources"]["AWSEC2VPCmain"]["Properties"]["CidrBlock"],
            "10.0.0.0/16"
        );
    }
}
