//! Tag storage and filtering.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use hive_core::ec2::{
    CreateTagsInput, CreateTagsOutput, DeleteTagsInput, DeleteTagsOutput, DescribeTagsInput,
    DescribeTagsOutput, TagDescription,
};
use hive_core::{Ec2Error, Ec2ErrorCode, ResourceKind};
use hive_volumes::{ObjectStore, get_json, put_json};

/// One resource's tags, as stored.
type TagMap = BTreeMap<String, String>;

fn blob_key(resource_id: &str) -> String {
    format!("tags/{resource_id}.json")
}

fn resource_type_of(resource_id: &str) -> String {
    ResourceKind::from_id(resource_id)
        .map(|k| k.type_name().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// The tag service.
pub struct TagsService {
    objects: Arc<dyn ObjectStore>,
    /// Serializes every read-modify-write cycle across all resources.
    lock: RwLock<()>,
}

impl TagsService {
    pub fn new(objects: Arc<dyn ObjectStore>) -> Self {
        Self {
            objects,
            lock: RwLock::new(()),
        }
    }

    fn internal(e: impl std::fmt::Display) -> Ec2Error {
        Ec2Error::internal(e.to_string())
    }

    /// Merge tags onto each named resource; duplicate keys overwrite.
    pub async fn create_tags(&self, input: &CreateTagsInput) -> Result<CreateTagsOutput, Ec2Error> {
        if input.resources.is_empty() {
            return Err(Ec2Error::new(
                Ec2ErrorCode::MissingParameter,
                "Resources must not be empty",
            ));
        }
        if input.tags.is_empty() {
            return Err(Ec2Error::new(
                Ec2ErrorCode::MissingParameter,
                "Tags must not be empty",
            ));
        }

        let _guard = self.lock.write().await;
        for resource_id in &input.resources {
            let key = blob_key(resource_id);
            let mut map: TagMap = get_json(self.objects.as_ref(), &key)
                .await
                .map_err(Self::internal)?
                .unwrap_or_default();
            for tag in &input.tags {
                map.insert(tag.key.clone(), tag.value.clone().unwrap_or_default());
            }
            put_json(self.objects.as_ref(), &key, &map)
                .await
                .map_err(Self::internal)?;
            debug!(%resource_id, count = input.tags.len(), "tags merged");
        }
        Ok(CreateTagsOutput { r#return: true })
    }

    /// List tags matching the given filters.
    ///
    /// Supported filter names: `resource-id`, `resource-type`, `key`,
    /// `value`. Anything else is an `InvalidParameterValue`.
    pub async fn describe_tags(
        &self,
        input: &DescribeTagsInput,
    ) -> Result<DescribeTagsOutput, Ec2Error> {
        for filter in &input.filters {
            if !matches!(
                filter.name.as_str(),
                "resource-id" | "resource-type" | "key" | "value"
            ) {
                return Err(Ec2Error::new(
                    Ec2ErrorCode::InvalidParameterValue,
                    format!("unknown filter name {:?}", filter.name),
                ));
            }
        }

        let _guard = self.lock.read().await;
        let keys = self
            .objects
            .list("tags/")
            .await
            .map_err(Self::internal)?;

        let mut descriptions = Vec::new();
        for key in keys {
            let Some(resource_id) = key
                .strip_prefix("tags/")
                .and_then(|k| k.strip_suffix(".json"))
            else {
                continue;
            };
            let Some(map) = get_json::<TagMap>(self.objects.as_ref(), &key)
                .await
                .map_err(Self::internal)?
            else {
                continue;
            };
            let resource_type = resource_type_of(resource_id);
            for (tag_key, tag_value) in map {
                let description = TagDescription {
                    resource_id: resource_id.to_string(),
                    resource_type: resource_type.clone(),
                    key: tag_key,
                    value: tag_value,
                };
                if matches_filters(&description, &input.filters) {
                    descriptions.push(description);
                }
            }
        }
        Ok(DescribeTagsOutput { tags: descriptions })
    }

    /// Delete tags from each named resource.
    ///
    /// An empty tag list erases everything for the resource. Entries with a
    /// value only delete when the stored value matches; entries without a
    /// value delete unconditionally by key.
    pub async fn delete_tags(&self, input: &DeleteTagsInput) -> Result<DeleteTagsOutput, Ec2Error> {
        if input.resources.is_empty() {
            return Err(Ec2Error::new(
                Ec2ErrorCode::MissingParameter,
                "Resources must not be empty",
            ));
        }

        let _guard = self.lock.write().await;
        for resource_id in &input.resources {
            let key = blob_key(resource_id);
            if input.tags.is_empty() {
                self.objects.delete(&key).await.map_err(Self::internal)?;
                debug!(%resource_id, "all tags erased");
                continue;
            }

            let Some(mut map) = get_json::<TagMap>(self.objects.as_ref(), &key)
                .await
                .map_err(Self::internal)?
            else {
                continue;
            };
            for tag in &input.tags {
                match &tag.value {
                    None => {
                        map.remove(&tag.key);
                    }
                    Some(value) => {
                        if map.get(&tag.key) == Some(value) {
                            map.remove(&tag.key);
                        }
                    }
                }
            }
            if map.is_empty() {
                self.objects.delete(&key).await.map_err(Self::internal)?;
            } else {
                put_json(self.objects.as_ref(), &key, &map)
                    .await
                    .map_err(Self::internal)?;
            }
        }
        Ok(DeleteTagsOutput { r#return: true })
    }
}

fn matches_filters(description: &TagDescription, filters: &[hive_core::ec2::Filter]) -> bool {
    filters.iter().all(|filter| {
        let field = match filter.name.as_str() {
            "resource-id" => &description.resource_id,
            "resource-type" => &description.resource_type,
            "key" => &description.key,
            "value" => &description.value,
            _ => return false,
        };
        filter.values.iter().any(|v| v == field)
    })
}
