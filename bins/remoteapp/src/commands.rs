//! Subcommands driving the container manager

use anyhow::{anyhow, bail, Context, Result};
use clap::builder::BoolishValueParser;
use clap::Args;
use remoteapp_container_manager::{
    wait_for_http_server_2xx, ConfigurableHttpProxy, Container, ContainerManager, ManagerConfig,
    ReverseProxy, VolumeBind, VolumeMode, Volumes,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Engine and realm settings shared by every subcommand
#[derive(Args, Debug)]
pub struct ManagerArgs {
    /// JSON configuration file; explicit flags override its values
    #[arg(long, global = true, env = "REMOTEAPP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Realm owning the managed containers
    #[arg(long, global = true, env = "REMOTEAPP_REALM")]
    pub realm: Option<String>,

    /// Docker engine endpoint (unix:///var/run/docker.sock, tcp://host:2376)
    #[arg(long, global = true, env = "DOCKER_HOST")]
    pub docker_host: Option<String>,

    /// Use TLS towards the engine
    #[arg(long, global = true, env = "DOCKER_TLS", value_parser = BoolishValueParser::new())]
    pub tls: bool,

    /// Verify the engine certificate
    #[arg(
        long,
        global = true,
        env = "DOCKER_TLS_VERIFY",
        value_parser = BoolishValueParser::new()
    )]
    pub tls_verify: bool,

    /// Directory holding ca.pem, cert.pem and key.pem
    #[arg(long, global = true, env = "DOCKER_CERT_PATH")]
    pub cert_path: Option<PathBuf>,

    /// Port the application listens on inside the container
    #[arg(long, global = true, env = "REMOTEAPP_CONTAINER_PORT")]
    pub container_port: Option<u16>,
}

impl ManagerArgs {
    pub fn manager_config(&self) -> Result<ManagerConfig> {
        let mut config = match &self.config {
            Some(path) => ManagerConfig::from_json_file(path)?,
            None => ManagerConfig::default(),
        };

        if let Some(realm) = &self.realm {
            config.realm = realm.clone();
        }
        if let Some(port) = self.container_port {
            config.container_port = port;
        }
        if let Some(host) = &self.docker_host {
            config.docker.host = Some(host.clone());
        }
        if self.tls {
            config.docker.tls = true;
        }
        if self.tls_verify {
            config.docker.tls = true;
            config.docker.tls_verify = true;
        }
        if let Some(dir) = &self.cert_path {
            config.docker.tls_ca = Some(dir.join("ca.pem"));
            config.docker.tls_cert = Some(dir.join("cert.pem"));
            config.docker.tls_key = Some(dir.join("key.pem"));
        }

        Ok(config)
    }
}

#[derive(Args, Debug)]
pub struct ProxyArgs {
    /// configurable-http-proxy REST API; routes are left alone when unset
    #[arg(long, env = "PROXY_API_URL")]
    pub proxy_api_url: Option<String>,

    /// Token for the proxy API
    #[arg(long, env = "CONFIGPROXY_AUTH_TOKEN", default_value = "", hide_env_values = true)]
    pub proxy_token: String,
}

impl ProxyArgs {
    fn proxy(&self) -> Result<Option<ConfigurableHttpProxy>> {
        self.proxy_api_url
            .as_ref()
            .map(|url| ConfigurableHttpProxy::new(url.clone(), self.proxy_token.clone()))
            .transpose()
            .context("Failed to create proxy client")
    }
}

#[derive(Args, Debug)]
pub struct StartArgs {
    /// Owner of the container
    #[arg(long)]
    pub user: String,

    /// Image to run
    #[arg(long)]
    pub image: String,

    /// Grant the container satisfies
    #[arg(long)]
    pub mapping_id: String,

    /// Public base path of the user
    #[arg(long, default_value = "/")]
    pub base_urlpath: String,

    /// Bind mount, SOURCE:TARGET[:ro|rw]; repeatable
    #[arg(long = "volume", short = 'v', value_parser = parse_volume)]
    pub volumes: Vec<(String, VolumeBind)>,

    /// Extra environment, KEY=VALUE; repeatable
    #[arg(long = "env", short = 'e', value_parser = parse_key_value)]
    pub environment: Vec<(String, String)>,

    /// Startup option offered by the image, NAME=VALUE (e.g. resolution=1280x800)
    #[arg(long = "option", short = 'o', value_parser = parse_key_value)]
    pub options: Vec<(String, String)>,

    /// Seconds to wait for the application to answer with 2xx
    #[arg(long)]
    pub wait_ready: Option<u64>,

    #[command(flatten)]
    pub proxy: ProxyArgs,
}

#[derive(Args, Debug)]
pub struct StopArgs {
    /// Engine id of the container
    #[arg(required_unless_present = "url_id")]
    pub container_id: Option<String>,

    /// Public url id of the container
    #[arg(long, conflicts_with = "container_id")]
    pub url_id: Option<String>,

    #[command(flatten)]
    pub proxy: ProxyArgs,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    #[arg(long)]
    pub user: Option<String>,

    #[arg(long)]
    pub mapping_id: Option<String>,

    #[arg(long)]
    pub url_id: Option<String>,

    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ImageArgs {
    /// Image name, e.g. repo/app:latest
    pub name: String,
}

pub async fn start(manager: &ContainerManager, args: StartArgs) -> Result<()> {
    let image = manager
        .image(&args.image)
        .await?
        .ok_or_else(|| anyhow!("Image {} not found", args.image))?;

    let options: HashMap<String, String> = args.options.into_iter().collect();
    let mut environment = image.startup_environment(&options)?;
    environment.extend(args.environment);

    let volumes: Volumes = args.volumes.into_iter().collect();

    let container = manager
        .start_container(
            &args.user,
            &args.image,
            &args.mapping_id,
            &args.base_urlpath,
            &volumes,
            &environment,
        )
        .await?;

    if let Some(proxy) = args.proxy.proxy()? {
        if let Err(e) = proxy
            .register(&container.urlpath, &container.host_url())
            .await
        {
            warn!(error = %e, "Proxy registration failed, stopping container");
            manager.stop_and_remove_container(&container.engine_id).await?;
            return Err(e.into());
        }
    }

    if let Some(seconds) = args.wait_ready {
        let url = format!("{}{}", container.host_url(), container.urlpath);
        wait_for_http_server_2xx(&url, Duration::from_secs(seconds)).await?;
    }

    println!("{}", serde_json::to_string_pretty(&container)?);
    Ok(())
}

pub async fn stop(manager: &ContainerManager, args: StopArgs) -> Result<()> {
    let container = match (&args.url_id, &args.container_id) {
        (Some(url_id), _) => manager
            .find_container(Some(url_id), None, None)
            .await?
            .ok_or_else(|| anyhow!("No container with url id {}", url_id))?,
        (None, Some(container_id)) => find_by_engine_id(manager, container_id).await?,
        (None, None) => bail!("Either a container id or --url-id is required"),
    };

    if let Some(proxy) = args.proxy.proxy()? {
        if container.urlpath.is_empty() {
            warn!(container_id = %container.engine_id, "Container has no urlpath to unregister");
        } else if let Err(e) = proxy.unregister(&container.urlpath).await {
            warn!(error = %e, urlpath = %container.urlpath, "Proxy unregistration failed");
        }
    }

    manager
        .stop_and_remove_container(&container.engine_id)
        .await?;
    info!(container_id = %container.engine_id, "Stopped");
    Ok(())
}

/// A container that is not found in this realm is still handed to the manager
/// so a half-started one gets cleaned up.
async fn find_by_engine_id(manager: &ContainerManager, container_id: &str) -> Result<Container> {
    let containers = manager.find_containers(None, None, None).await?;
    Ok(select_by_engine_id(containers, container_id)?.unwrap_or_else(|| Container {
        engine_id: container_id.to_string(),
        ..Default::default()
    }))
}

/// Exact id match, else the only container whose id starts with `container_id`.
fn select_by_engine_id(containers: Vec<Container>, container_id: &str) -> Result<Option<Container>> {
    if let Some(exact) = containers.iter().find(|c| c.engine_id == container_id) {
        return Ok(Some(exact.clone()));
    }

    let mut matches: Vec<Container> = containers
        .into_iter()
        .filter(|c| c.engine_id.starts_with(container_id))
        .collect();
    match matches.len() {
        0 | 1 => Ok(matches.pop()),
        count => bail!(
            "Container id prefix {} is ambiguous: {} containers match",
            container_id,
            count
        ),
    }
}

pub async fn list(manager: &ContainerManager, args: ListArgs) -> Result<()> {
    let containers = manager
        .find_containers(
            args.url_id.as_deref(),
            args.mapping_id.as_deref(),
            args.user.as_deref(),
        )
        .await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&containers)?);
        return Ok(());
    }

    println!(
        "{:<14} {:<14} {:<20} {:<16} {:<30} URL",
        "CONTAINER", "URL ID", "USER", "MAPPING", "IMAGE"
    );
    for c in &containers {
        println!(
            "{:<14} {:<14} {:<20} {:<16} {:<30} {}",
            &c.engine_id[..12.min(c.engine_id.len())],
            c.url_id,
            c.user_name,
            c.mapping_id,
            c.image_name,
            c.host_url()
        );
    }
    Ok(())
}

pub async fn image(manager: &ContainerManager, args: ImageArgs) -> Result<()> {
    let image = manager
        .image(&args.name)
        .await?
        .ok_or_else(|| anyhow!("Image {} not found", args.name))?;
    println!("{}", serde_json::to_string_pretty(&image)?);
    Ok(())
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))?;
    if key.is_empty() {
        return Err(format!("empty key in '{}'", raw));
    }
    Ok((key.to_string(), value.to_string()))
}

fn parse_volume(raw: &str) -> Result<(String, VolumeBind), String> {
    let parts: Vec<&str> = raw.split(':').collect();
    let (source, bind, mode) = match parts.as_slice() {
        [source, bind] => (*source, *bind, VolumeMode::ReadWrite),
        [source, bind, "rw"] => (*source, *bind, VolumeMode::ReadWrite),
        [source, bind, "ro"] => (*source, *bind, VolumeMode::ReadOnly),
        _ => return Err(format!("expected SOURCE:TARGET[:ro|rw], got '{}'", raw)),
    };
    if source.is_empty() || bind.is_empty() {
        return Err(format!("empty path in '{}'", raw));
    }
    Ok((
        source.to_string(),
        VolumeBind {
            bind: bind.to_string(),
            mode,
        },
    ))
}
