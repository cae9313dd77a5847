//! Tag operation forwarding.
//!
//! The tag service owns the semantics; the gateway forwards each request
//! as a single queued broker call.

use hive_broker::subjects;
use hive_core::Ec2Error;
use hive_core::ec2::{
    CreateTagsInput, CreateTagsOutput, DeleteTagsInput, DeleteTagsOutput, DescribeTagsInput,
    DescribeTagsOutput,
};

use crate::{Gateway, TAGS_TIMEOUT, to_ec2_error};

impl Gateway {
    pub async fn create_tags(&self, input: &CreateTagsInput) -> Result<CreateTagsOutput, Ec2Error> {
        self.broker
            .request(subjects::CREATE_TAGS, input, TAGS_TIMEOUT)
            .await
            .map_err(to_ec2_error)
    }

    pub async fn describe_tags(
        &self,
        input: &DescribeTagsInput,
    ) -> Result<DescribeTagsOutput, Ec2Error> {
        self.broker
            .request(subjects::DESCRIBE_TAGS, input, TAGS_TIMEOUT)
            .await
            .map_err(to_ec2_error)
    }

    pub async fn delete_tags(&self, input: &DeleteTagsInput) -> Result<DeleteTagsOutput, Ec2Error> {
        self.broker
            .request(subjects::DELETE_TAGS, input, TAGS_TIMEOUT)
            .await
            .map_err(to_ec2_error)
    }
}
