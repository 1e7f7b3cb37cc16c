//! Amazon EC2 backend over the EC2 Query API.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use super::sigv4::{self, Credentials, SignableRequest};
use super::{base_url, http_client, require};
use crate::error::{ProviderError, Result, Unavailable};
use crate::traits::{mismatched_params, Provider};
use crate::types::{AwsCreateParams, CreateParams, ProviderKind, VmSnapshot};

const KIND: ProviderKind = ProviderKind::Aws;
const EC2_API_VERSION: &str = "2016-11-15";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=utf-8";

/// AWS access key credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsConfig {
    pub access_key: String,
    pub secret_key: String,
    /// Region used for listing
    pub region: String,
    /// Overrides the regional EC2 endpoint
    pub endpoint: Option<String>,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            access_key: String::new(),
            secret_key: String::new(),
            region: "us-east-1".to_string(),
            endpoint: None,
        }
    }
}

impl AwsConfig {
    pub fn is_configured(&self) -> bool {
        !self.access_key.trim().is_empty() || !self.secret_key.trim().is_empty()
    }
}

/// EC2 provider. Supports listing and creation.
pub struct AwsProvider {
    config: AwsConfig,
    client: reqwest::Client,
    poll_interval: Duration,
}

impl AwsProvider {
    pub async fn connect(config: AwsConfig) -> std::result::Result<Self, Unavailable> {
        require(KIND, "access key", &config.access_key)?;
        require(KIND, "secret key", &config.secret_key)?;
        require(KIND, "region", &config.region)?;

        let client = http_client(KIND, false)?;
        info!(region = %config.region, "AWS provider configured");

        Ok(Self {
            config,
            client,
            poll_interval: Duration::from_secs(5),
        })
    }

    /// Interval between instance state polls after a launch.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn endpoint(&self, region: &str) -> String {
        match &self.config.endpoint {
            Some(endpoint) => base_url(endpoint),
            None => format!("https://ec2.{}.amazonaws.com", region),
        }
    }

    /// Issue a signed Query API call and return the response body.
    async fn call(&self, region: &str, params: &[(String, String)]) -> Result<String> {
        let url = reqwest::Url::parse(&format!("{}/", self.endpoint(region)))
            .map_err(|e| ProviderError::backend(KIND.as_str(), format!("invalid endpoint: {}", e)))?;
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => return Err(ProviderError::backend(KIND.as_str(), "endpoint has no host")),
        };

        let body = encode_form(params);
        let now = Utc::now();
        let date = sigv4::amz_date(&now);
        let headers = [
            ("content-type", FORM_CONTENT_TYPE),
            ("host", host.as_str()),
            ("x-amz-date", date.as_str()),
        ];
        let request = SignableRequest {
            method: "POST",
            path: url.path(),
            query: "",
            headers: &headers,
            payload: body.as_bytes(),
        };
        let credentials = Credentials {
            access_key: &self.config.access_key,
            secret_key: &self.config.secret_key,
        };
        let authorization = sigv4::authorization(credentials, region, "ec2", &request, &now)
            .map_err(|e| ProviderError::backend(KIND.as_str(), format!("request signing failed: {}", e)))?;

        let response = self
            .client
            .post(url.clone())
            .header("content-type", FORM_CONTENT_TYPE)
            .header("x-amz-date", date.as_str())
            .header("authorization", authorization)
            .body(body)
            .send()
            .await
            .map_err(|e| ProviderError::backend(KIND.as_str(), format!("request failed: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::backend(KIND.as_str(), format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            let message = match quick_xml::de::from_str::<ErrorResponse>(&text) {
                Ok(parsed) => parsed
                    .errors
                    .error
                    .into_iter()
                    .next()
                    .map(|e| format!("{}: {}", e.code, e.message))
                    .unwrap_or_else(|| format!("HTTP {}", status)),
                Err(_) => format!("HTTP {}", status),
            };
            return Err(ProviderError::backend(KIND.as_str(), message));
        }

        Ok(text)
    }

    async fn describe(&self, region: &str, extra: Vec<(String, String)>) -> Result<Vec<Instance>> {
        let mut instances = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut params = vec![
                ("Action".to_string(), "DescribeInstances".to_string()),
                ("Version".to_string(), EC2_API_VERSION.to_string()),
            ];
            params.extend(extra.iter().cloned());
            if let Some(token) = next_token.take() {
                params.push(("NextToken".to_string(), token));
            }

            let body = self.call(region, &params).await?;
            let page: DescribeInstancesResponse = parse_xml(&body)?;
            instances.extend(
                page.reservation_set
                    .items
                    .into_iter()
                    .flat_map(|r| r.instances_set.items),
            );

            match page.next_token.filter(|t| !t.is_empty()) {
                Some(token) => next_token = Some(token),
                None => break,
            }
        }

        Ok(instances)
    }

    /// Wait until a freshly launched instance leaves `pending`.
    async fn wait_for_instance(&self, region: &str, instance_id: &str) -> Result<()> {
        let filter = vec![("InstanceId.1".to_string(), instance_id.to_string())];
        loop {
            let state = match self.describe(region, filter.clone()).await {
                Ok(instances) => instances.into_iter().next().map(|i| i.instance_state.name),
                // Launches are eventually consistent
                Err(ProviderError::Backend { message, .. })
                    if message.starts_with("InvalidInstanceID.NotFound") =>
                {
                    None
                }
                Err(e) => return Err(e),
            };
            debug!(instance_id, state = ?state, "EC2 instance state");

            match state.as_deref() {
                None | Some("pending") => tokio::time::sleep(self.poll_interval).await,
                Some("running") | Some("stopped") => return Ok(()),
                Some(other) => {
                    return Err(ProviderError::backend(
                        KIND.as_str(),
                        format!("instance {} entered state {}", instance_id, other),
                    ))
                }
            }
        }
    }
}

#[async_trait]
impl Provider for AwsProvider {
    fn kind(&self) -> ProviderKind {
        KIND
    }

    #[instrument(skip(self), fields(provider = "aws", region = %self.config.region))]
    async fn list_vms(&self) -> Result<Vec<VmSnapshot>> {
        let instances = self.describe(&self.config.region, Vec::new()).await?;
        let vms: Vec<VmSnapshot> = instances.into_iter().map(Instance::into_snapshot).collect();

        debug!(count = vms.len(), "Listed EC2 instances");
        Ok(vms)
    }

    fn supports_create(&self) -> bool {
        true
    }

    #[instrument(skip(self, params), fields(provider = "aws", vm_name = %params.vm_name()))]
    async fn create_vm(&self, params: CreateParams) -> Result<()> {
        let params = match params {
            CreateParams::Aws(p) => p,
            other => return Err(mismatched_params(self, &other)),
        };

        info!(
            region = %params.region,
            instance_type = %params.instance_type,
            image_id = %params.image_id,
            "Launching EC2 instance"
        );

        let body = self.call(&params.region, &run_instances_params(&params)).await?;
        let launched: RunInstancesResponse = parse_xml(&body)?;
        let instance_id = launched
            .instances_set
            .items
            .into_iter()
            .next()
            .map(|i| i.instance_id)
            .ok_or_else(|| ProviderError::backend(KIND.as_str(), "RunInstances returned no instance"))?;

        info!(instance_id = %instance_id, "EC2 instance launched");
        self.wait_for_instance(&params.region, &instance_id).await
    }
}

fn run_instances_params(params: &AwsCreateParams) -> Vec<(String, String)> {
    let mut out = vec![
        ("Action".to_string(), "RunInstances".to_string()),
        ("Version".to_string(), EC2_API_VERSION.to_string()),
        ("ImageId".to_string(), params.image_id.clone()),
        ("InstanceType".to_string(), params.instance_type.clone()),
        ("MinCount".to_string(), "1".to_string()),
        ("MaxCount".to_string(), "1".to_string()),
        ("KeyName".to_string(), params.key_name.clone()),
    ];
    for (i, group) in params.security_group_ids.iter().enumerate() {
        out.push((format!("SecurityGroupId.{}", i + 1), group.clone()));
    }
    out.push(("TagSpecification.1.ResourceType".to_string(), "instance".to_string()));
    out.push(("TagSpecification.1.Tag.1.Key".to_string(), "Name".to_string()));
    out.push(("TagSpecification.1.Tag.1.Value".to_string(), params.vm_name.clone()));
    out
}

fn encode_form(params: &[(String, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn parse_xml<T: for<'de> Deserialize<'de>>(body: &str) -> Result<T> {
    quick_xml::de::from_str(body)
        .map_err(|e| ProviderError::backend(KIND.as_str(), format!("malformed response: {}", e)))
}

// =============================================================================
// EC2 XML WIRE TYPES
// =============================================================================

/// EC2 wraps every list in `<xxxSet><item>...</item></xxxSet>`.
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct ItemSet<T> {
    #[serde(rename = "item", default)]
    items: Vec<T>,
}

impl<T> Default for ItemSet<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeInstancesResponse {
    #[serde(default)]
    reservation_set: ItemSet<Reservation>,
    #[serde(default)]
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Reservation {
    #[serde(default)]
    instances_set: ItemSet<Instance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Instance {
    instance_id: String,
    #[serde(default)]
    instance_state: InstanceState,
    #[serde(default)]
    placement: Placement,
    #[serde(default)]
    tag_set: ItemSet<Tag>,
}

impl Instance {
    fn into_snapshot(self) -> VmSnapshot {
        let name = self
            .tag_set
            .items
            .into_iter()
            .find(|t| t.key == "Name")
            .map(|t| t.value)
            .unwrap_or_default();
        VmSnapshot::new(
            self.instance_id,
            name,
            KIND.as_str(),
            self.placement.availability_zone,
            self.instance_state.name,
        )
    }
}

#[derive(Debug, Default, Deserialize)]
struct InstanceState {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Placement {
    #[serde(default)]
    availability_zone: String,
}

#[derive(Debug, Deserialize)]
struct Tag {
    key: String,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunInstancesResponse {
    #[serde(default)]
    instances_set: ItemSet<LaunchedInstance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LaunchedInstance {
    instance_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ErrorResponse {
    errors: ErrorList,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ErrorList {
    #[serde(default)]
    error: Vec<Ec2Error>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Ec2Error {
    code: String,
    #[serde(default)]
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server, ServerGuard};

    const PAGE_ONE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<DescribeInstancesResponse xmlns="http://ec2.amazonaws.com/doc/2016-11-15/">
    <requestId>req-1</requestId>
    <reservationSet>
        <item>
            <reservationId>r-1</reservationId>
            <instancesSet>
                <item>
                    <instanceId>i-0001</instanceId>
                    <instanceState><code>16</code><name>running</name></instanceState>
                    <placement><availabilityZone>us-east-1a</availabilityZone></placement>
                    <tagSet>
                        <item><key>env</key><value>dev</value></item>
                        <item><key>Name</key><value>web-1</value></item>
                    </tagSet>
                </item>
                <item>
                    <instanceId>i-0002</instanceId>
                    <instanceState><code>80</code><name>stopped</name></instanceState>
                    <placement><availabilityZone>us-east-1b</availabilityZone></placement>
                </item>
            </instancesSet>
        </item>
    </reservationSet>
    <nextToken>page-2</nextToken>
</DescribeInstancesResponse>"#;

    const PAGE_TWO: &str = r#"<DescribeInstancesResponse>
    <reservationSet>
        <item>
            <instancesSet>
                <item>
                    <instanceId>i-0003</instanceId>
                    <instanceState><name>pending</name></instanceState>
                    <placement><availabilityZone>us-east-1c</availabilityZone></placement>
                    <tagSet><item><key>Name</key><value>db-1</value></item></tagSet>
                </item>
            </instancesSet>
        </item>
    </reservationSet>
</DescribeInstancesResponse>"#;

    async fn provider(server: &ServerGuard) -> AwsProvider {
        AwsProvider::connect(AwsConfig {
            access_key: "AKIDEXAMPLE".into(),
            secret_key: "secret".into(),
            region: "us-east-1".into(),
            endpoint: Some(server.url()),
        })
        .await
        .unwrap()
        .with_poll_interval(Duration::from_millis(10))
    }

    #[test]
    fn test_parse_describe_instances() {
        let page: DescribeInstancesResponse = parse_xml(PAGE_ONE).unwrap();
        let vms: Vec<VmSnapshot> = page
            .reservation_set
            .items
            .into_iter()
            .flat_map(|r| r.instances_set.items)
            .map(Instance::into_snapshot)
            .collect();

        assert_eq!(vms.len(), 2);
        assert_eq!(vms[0], VmSnapshot::new("i-0001", "web-1", "aws", "us-east-1a", "running"));
        // No Name tag
        assert_eq!(vms[1].name, "");
        assert_eq!(vms[1].status, "stopped");
        assert_eq!(page.next_token.as_deref(), Some("page-2"));
    }

    #[test]
    fn test_parse_empty_sets() {
        let page: DescribeInstancesResponse =
            parse_xml("<DescribeInstancesResponse><reservationSet/></DescribeInstancesResponse>").unwrap();
        assert!(page.reservation_set.items.is_empty());
        assert!(page.next_token.is_none());

        let page: DescribeInstancesResponse =
            parse_xml("<DescribeInstancesResponse></DescribeInstancesResponse>").unwrap();
        assert!(page.reservation_set.items.is_empty());

        let launched: RunInstancesResponse = parse_xml(
            "<RunInstancesResponse><instancesSet><item><instanceId>i-9</instanceId></item></instancesSet></RunInstancesResponse>",
        )
        .unwrap();
        assert_eq!(launched.instances_set.items[0].instance_id, "i-9");
    }

    #[test]
    fn test_run_instances_params() {
        let params = AwsCreateParams {
            vm_name: "web-1".into(),
            region: "us-east-1".into(),
            instance_type: "t3.micro".into(),
            image_id: "ami-123".into(),
            key_name: "ops".into(),
            security_group_ids: vec!["sg-1".into(), "sg-2".into()],
        };
        let form = encode_form(&run_instances_params(&params));

        assert!(form.starts_with("Action=RunInstances&Version=2016-11-15"));
        assert!(form.contains("MinCount=1&MaxCount=1&KeyName=ops"));
        assert!(form.contains("SecurityGroupId.1=sg-1&SecurityGroupId.2=sg-2"));
        assert!(form.contains("TagSpecification.1.Tag.1.Value=web-1"));
    }

    #[tokio::test]
    async fn test_connect_requires_keys() {
        let err = AwsProvider::connect(AwsConfig::default()).await.err().unwrap();
        assert_eq!(err.reason, "access key is not configured");
    }

    #[tokio::test]
    async fn test_list_paginates() {
        let mut server = Server::new_async().await;
        let _second = server
            .mock("POST", "/")
            .match_body(Matcher::Regex("NextToken=page-2".into()))
            .with_status(200)
            .with_body(PAGE_TWO)
            .create_async()
            .await;
        let _first = server
            .mock("POST", "/")
            .match_header("authorization", Matcher::Regex("^AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/".into()))
            .match_body(Matcher::Regex("^Action=DescribeInstances&Version=2016-11-15$".into()))
            .with_status(200)
            .with_body(PAGE_ONE)
            .create_async()
            .await;

        let vms = provider(&server).await.list_vms().await.unwrap();
        let ids: Vec<&str> = vms.iter().map(|vm| vm.id.as_str()).collect();
        assert_eq!(ids, vec!["i-0001", "i-0002", "i-0003"]);
        assert_eq!(vms[2].status, "pending");
    }

    #[tokio::test]
    async fn test_error_response_is_decoded() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(401)
            .with_body(
                r#"<Response><Errors><Error><Code>AuthFailure</Code><Message>AWS was not able to validate the provided access credentials</Message></Error></Errors><RequestID>x</RequestID></Response>"#,
            )
            .create_async()
            .await;

        let err = provider(&server).await.list_vms().await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "aws error: AuthFailure: AWS was not able to validate the provided access credentials"
        );
    }

    #[tokio::test]
    async fn test_create_waits_for_running() {
        let mut server = Server::new_async().await;
        let run = server
            .mock("POST", "/")
            .match_body(Matcher::Regex("^Action=RunInstances".into()))
            .with_status(200)
            .with_body(
                r#"<RunInstancesResponse><instancesSet><item><instanceId>i-new</instanceId></item></instancesSet></RunInstancesResponse>"#,
            )
            .create_async()
            .await;
        let _describe = server
            .mock("POST", "/")
            .match_body(Matcher::Regex("InstanceId.1=i-new".into()))
            .with_status(200)
            .with_body(
                r#"<DescribeInstancesResponse><reservationSet><item><instancesSet><item>
                    <instanceId>i-new</instanceId><instanceState><name>running</name></instanceState>
                </item></instancesSet></item></reservationSet></DescribeInstancesResponse>"#,
            )
            .create_async()
            .await;

        let params = AwsCreateParams {
            vm_name: "web-2".into(),
            region: "us-east-1".into(),
            instance_type: "t3.micro".into(),
            image_id: "ami-123".into(),
            key_name: "ops".into(),
            security_group_ids: vec!["sg-1".into()],
        };
        provider(&server).await.create_vm(CreateParams::Aws(params)).await.unwrap();
        run.assert_async().await;
    }
}
