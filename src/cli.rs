//! # CLI Frontend
//!
//! Flag definitions and command dispatch. Five operations, each a fixed
//! sequence of calls into the library:
//!
//! ```bash
//! # Fetch the cluster's OIDC discovery content, publish it, register the provider
//! irsactl get --upload-to-s3 --create-oidc-provider --aws-profile prod
//!
//! # Display/export the discovery content only
//! irsactl view -o yaml
//!
//! # Create an IAM role for a service account, with the service account
//! irsactl create-role -r my-role -p my-policy --sa-name my-sa --sa-namespace apps --create-sa
//!
//! # Create just the annotated service account
//! irsactl create-sa --sa-name my-sa --sa-namespace apps --role-arn arn:aws:iam::123456789012:role/my-role
//!
//! # Deploy cert-manager and the pod identity webhook
//! irsactl deploy-webhook
//! ```

use std::path::{Path, PathBuf};

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::info;

use crate::aws::iam::{self, IamClient};
use crate::aws::s3::{self, ObjectStore};
use crate::error::{Error, Result};
use crate::k8s::apply::Applier;
use crate::k8s::client as k8s_client;
use crate::k8s::manifest::{self, SchemaRegistry};
use crate::k8s::oidc::{self, DiscoveryDocument, OidcClient};
use crate::k8s::sa;

const DEFAULT_CERT_MANAGER_URL: &str =
    "https://github.com/cert-manager/cert-manager/releases/download/v1.8.2/cert-manager.yaml";
const DEFAULT_WEBHOOK_BASE_URL: &str =
    "https://github.com/aws/amazon-eks-pod-identity-webhook/raw/v0.4.0/deploy/";

/// Manifest files under the webhook deploy URL, in dependency order.
const WEBHOOK_FILES: [&str; 4] = [
    "auth.yaml",
    "deployment-base.yaml",
    "service.yaml",
    "mutatingwebhook.yaml",
];
/// Placeholder token the upstream deployment manifest ships with.
const WEBHOOK_IMAGE_PLACEHOLDER: &str = "IMAGE";
const WEBHOOK_IMAGE: &str = "amazon/amazon-eks-pod-identity-webhook:latest";

/// Wire a Kubernetes cluster's OIDC discovery to AWS IAM for workload
/// identity federation (IRSA).
#[derive(Parser)]
#[command(name = "irsactl", version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to kubeconfig (default: in-cluster config, falling back to the
    /// local kubeconfig chain)
    #[arg(long, global = true, value_name = "PATH")]
    kubeconfig: Option<PathBuf>,

    /// Named AWS profile used for every IAM and S3 call
    #[arg(long, global = true, value_name = "PROFILE")]
    aws_profile: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the cluster's OIDC discovery document and JWKS; optionally
    /// publish them to S3 and register the IAM OIDC provider
    Get {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Default)]
        output: OutputFormat,

        /// Publish the discovery document and JWKS to the issuer's S3 bucket
        #[arg(long)]
        upload_to_s3: bool,

        /// Register the issuer as an OIDC identity provider in IAM
        #[arg(long)]
        create_oidc_provider: bool,
    },
    /// Display or export the cluster's OIDC discovery content
    View {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Default)]
        output: OutputFormat,

        /// Publish the discovery document and JWKS to the issuer's S3 bucket
        #[arg(long)]
        upload_to_s3: bool,
    },
    /// Create an IAM role a service account can assume via the cluster's
    /// OIDC provider
    CreateRole {
        /// Role name
        #[arg(short = 'r', long)]
        role_name: String,

        /// Managed policy name to attach to the role
        #[arg(short = 'p', long)]
        policy_name: String,

        /// Service account name
        #[arg(long, default_value = "my-sa")]
        sa_name: String,

        /// Service account namespace
        #[arg(long, default_value = "default")]
        sa_namespace: String,

        /// Also create the annotated service account
        #[arg(long)]
        create_sa: bool,

        /// Allow every service account in the namespace to assume the role,
        /// not only the named one
        #[arg(long, action = ArgAction::Set, default_value_t = true, num_args = 0..=1, default_missing_value = "true")]
        allow_all_sas: bool,
    },
    /// Create a service account annotated for an existing IAM role
    CreateSa {
        /// Service account name
        #[arg(long)]
        sa_name: String,

        /// Service account namespace
        #[arg(long, default_value = "default")]
        sa_namespace: String,

        /// ARN of the role the service account assumes
        #[arg(long)]
        role_arn: String,
    },
    /// Deploy cert-manager and the pod identity webhook
    DeployWebhook {
        /// cert-manager manifest URL
        #[arg(long, default_value = DEFAULT_CERT_MANAGER_URL, value_name = "URL")]
        cm_yaml: String,

        /// Base URL of the webhook deploy manifests
        #[arg(long, default_value = DEFAULT_WEBHOOK_BASE_URL, value_name = "BASE_URL")]
        webhook_url: String,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Default,
    Json,
    Yaml,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let kubeconfig = self.kubeconfig.as_deref();
        let profile = self.aws_profile.as_deref();

        match self.command {
            Commands::Get {
                output,
                upload_to_s3,
                create_oidc_provider,
            } => get_command(kubeconfig, profile, output, upload_to_s3, create_oidc_provider).await,
            Commands::View {
                output,
                upload_to_s3,
            } => get_command(kubeconfig, profile, output, upload_to_s3, false).await,
            Commands::CreateRole {
                role_name,
                policy_name,
                sa_name,
                sa_namespace,
                create_sa,
                allow_all_sas,
            } => {
                create_role_command(
                    kubeconfig,
                    profile,
                    &role_name,
                    &policy_name,
                    &sa_name,
                    &sa_namespace,
                    create_sa,
                    allow_all_sas,
                )
                .await
            }
            Commands::CreateSa {
                sa_name,
                sa_namespace,
                role_arn,
            } => {
                let config = k8s_client::load_config(kubeconfig).await?;
                let client = k8s_client::kube_client(config)?;
                sa::create_service_account(&client, &sa_name, &sa_namespace, &role_arn).await
            }
            Commands::DeployWebhook {
                cm_yaml,
                webhook_url,
            } => deploy_webhook_command(kubeconfig, &cm_yaml, &webhook_url).await,
        }
    }
}

/// The discovery content of one cluster: raw bytes as served, plus the two
/// parsed fields commands act on.
struct OidcBundle {
    discovery: Vec<u8>,
    jwks: Vec<u8>,
    document: DiscoveryDocument,
}

async fn fetch_bundle(kubeconfig: Option<&Path>) -> Result<OidcBundle> {
    let config = k8s_client::load_config(kubeconfig).await?;
    let conn = k8s_client::cluster_connection(&config)?;
    let client = OidcClient::new(&conn)?;

    let discovery = client.fetch_discovery().await?;
    let document = oidc::parse_discovery(&discovery)?;
    let jwks = client.fetch_jwks().await?;

    Ok(OidcBundle {
        discovery,
        jwks,
        document,
    })
}

async fn get_command(
    kubeconfig: Option<&Path>,
    profile: Option<&str>,
    output: OutputFormat,
    upload_to_s3: bool,
    create_oidc_provider: bool,
) -> Result<()> {
    let bundle = fetch_bundle(kubeconfig).await?;
    print_bundle(output, &bundle)?;

    if upload_to_s3 {
        let location = s3::issuer_location(&bundle.document.issuer)?;
        let store = ObjectStore::from_profile(profile).await;
        store
            .publish(&location, &bundle.discovery, &bundle.jwks)
            .await?;
        info!(bucket = %location.bucket, "published discovery content");
    }

    if create_oidc_provider {
        let arn = IamClient::from_profile(profile)
            .await
            .create_provider(&bundle.document.issuer)
            .await?;
        println!("{arn}");
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn create_role_command(
    kubeconfig: Option<&Path>,
    profile: Option<&str>,
    role_name: &str,
    policy_name: &str,
    sa_name: &str,
    sa_namespace: &str,
    create_sa: bool,
    allow_all_sas: bool,
) -> Result<()> {
    let config = k8s_client::load_config(kubeconfig).await?;
    let conn = k8s_client::cluster_connection(&config)?;
    let document = oidc::parse_discovery(&OidcClient::new(&conn)?.fetch_discovery().await?)?;

    let iam_client = IamClient::from_profile(profile).await;
    let provider_arn = iam_client
        .find_provider_arn(&iam::issuer_identifier(&document.issuer)?)
        .await?;
    let policy_arn = iam_client.find_policy_arn(policy_name).await?;

    let allowed_sa = if allow_all_sas { "*" } else { sa_name };
    let trust = iam::trust_policy(&provider_arn, sa_namespace, allowed_sa)?;
    let role_arn = iam_client.create_role(role_name, &trust).await?;
    iam_client.attach_policy(role_name, &policy_arn).await?;
    println!("{role_arn}");

    if create_sa {
        let client = k8s_client::kube_client(config)?;
        sa::create_service_account(&client, sa_name, sa_namespace, &role_arn).await?;
    }

    Ok(())
}

async fn deploy_webhook_command(
    kubeconfig: Option<&Path>,
    cm_yaml: &str,
    webhook_url: &str,
) -> Result<()> {
    let config = k8s_client::load_config(kubeconfig).await?;
    let registry = SchemaRegistry::with_defaults();

    info!(url = %cm_yaml, "fetching manifest");
    let content = manifest::fetch_manifest(cm_yaml).await?;
    apply_manifest(&config, &registry, &content).await?;

    for file in WEBHOOK_FILES {
        let url = format!("{webhook_url}{file}");
        info!(%url, "fetching manifest");
        let mut content = manifest::fetch_manifest(&url).await?;
        if file == "deployment-base.yaml" {
            content = substitute_image(&content);
        }
        apply_manifest(&config, &registry, &content).await?;
    }

    Ok(())
}

/// Apply one downloaded manifest as its own batch. Each batch runs a fresh
/// API discovery: an earlier batch may have installed CRDs (cert-manager
/// does) that later documents depend on.
async fn apply_manifest(
    config: &kube::Config,
    registry: &SchemaRegistry,
    content: &[u8],
) -> Result<()> {
    let objects = manifest::decode_manifest(registry, content)?;
    info!(count = objects.len(), "applying documents");
    let client = k8s_client::kube_client(config.clone())?;
    Applier::new(client).await?.apply_all(&objects).await
}

fn substitute_image(content: &[u8]) -> Vec<u8> {
    String::from_utf8_lossy(content)
        .replace(WEBHOOK_IMAGE_PLACEHOLDER, WEBHOOK_IMAGE)
        .into_bytes()
}

#[derive(Serialize)]
struct DiscoveryExport {
    #[serde(rename = "configURL")]
    config_url: String,
    #[serde(rename = "configContent")]
    config_content: String,
    #[serde(rename = "jwksURL")]
    jwks_url: String,
    #[serde(rename = "jwksContent")]
    jwks_content: String,
}

impl DiscoveryExport {
    fn from_bundle(bundle: &OidcBundle) -> Self {
        Self {
            config_url: format!(
                "{}/{}",
                bundle.document.issuer.trim_end_matches('/'),
                oidc::DISCOVERY_PATH
            ),
            config_content: String::from_utf8_lossy(&bundle.discovery).into_owned(),
            jwks_url: bundle.document.jwks_uri.clone(),
            jwks_content: String::from_utf8_lossy(&bundle.jwks).into_owned(),
        }
    }
}

fn print_bundle(output: OutputFormat, bundle: &OidcBundle) -> Result<()> {
    match output {
        OutputFormat::Default => {
            println!("{}", bundle.document.issuer);
            println!("{}", String::from_utf8_lossy(&bundle.discovery));
            println!("{}", bundle.document.jwks_uri);
            println!("{}", String::from_utf8_lossy(&bundle.jwks));
        }
        OutputFormat::Json => {
            let export = DiscoveryExport::from_bundle(bundle);
            let rendered = serde_json::to_string_pretty(&export)
                .map_err(|e| Error::Schema(format!("failed to render JSON output: {e}")))?;
            println!("{rendered}");
        }
        OutputFormat::Yaml => {
            let export = DiscoveryExport::from_bundle(bundle);
            let rendered = serde_yaml::to_string(&export)
                .map_err(|e| Error::Schema(format!("failed to render YAML output: {e}")))?;
            println!("{rendered}");
        }
    }
    Ok(())
}
