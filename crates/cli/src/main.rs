//! Command-line client for Tyler.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::io::Read;
use std::path::{Path, PathBuf};
use tyler_cli::api_client::{
    ApiClient, CreateUserRequest, RegisterRequest, RitualQuery, UpdateUserRequest,
};
use tyler_cli::{AuthState, SessionCache, SessionTokens};
use tyler_core::{Profile, Ritual};

#[derive(Parser)]
#[command(name = "tylerctl")]
#[command(about = "Command-line client for the Tyler ritual archive")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct ClientConfigArgs {
    /// Client config file path
    #[arg(long, env = "TYLER_CLIENT_CONFIG")]
    client_config: Option<String>,
}

#[derive(Args, Clone)]
struct ApiArgs {
    /// Server URL (overrides client config)
    #[arg(long, env = "TYLER_SERVER")]
    server: Option<String>,

    #[command(flatten)]
    client: ClientConfigArgs,
}

#[derive(Args, Clone)]
struct PasswordArgs {
    /// Password value (avoid if possible; prefer --password-stdin)
    #[arg(long)]
    password: Option<String>,
    /// Read the password from stdin
    #[arg(long, default_value_t = false)]
    password_stdin: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in and save the session locally
    Login {
        /// Server base URL (e.g., https://archive.example.org)
        url: String,
        /// Account email
        #[arg(long)]
        email: String,
        #[command(flatten)]
        password: PasswordArgs,
        #[command(flatten)]
        client: ClientConfigArgs,
    },
    /// Sign out and forget the saved session
    Logout {
        #[command(flatten)]
        api: ApiArgs,
    },
    /// Request an account (an administrator must approve it)
    Register {
        /// Server base URL
        url: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        degree: Option<i64>,
        #[arg(long)]
        lodge: Option<String>,
        #[command(flatten)]
        password: PasswordArgs,
    },
    /// Show the signed-in member
    Whoami {
        #[command(flatten)]
        api: ApiArgs,
    },
    /// Check server health and version
    Health {
        #[command(flatten)]
        api: ApiArgs,
    },
    /// Browse and manage rituals
    Rituals {
        #[command(subcommand)]
        command: RitualCommands,
        #[command(flatten)]
        api: ApiArgs,
    },
    /// Manage members (administrators)
    Users {
        #[command(subcommand)]
        command: UserCommands,
        #[command(flatten)]
        api: ApiArgs,
    },
}

#[derive(Subcommand)]
enum RitualCommands {
    /// List rituals visible to you
    List {
        #[arg(long)]
        degree: Option<String>,
        #[arg(long)]
        system: Option<String>,
        #[arg(long)]
        language: Option<String>,
        /// Group by degree, system or language
        #[arg(long)]
        organize_by: Option<String>,
    },
    /// Show one ritual
    Show { id: String },
    /// Counts of visible rituals per degree
    Stats,
    /// Delete a ritual and its file
    Delete { id: String },
}

#[derive(Subcommand)]
enum UserCommands {
    /// List members
    List,
    /// Create a confirmed member
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        degree: Option<i64>,
        #[arg(long)]
        lodge: Option<String>,
        /// user or admin
        #[arg(long)]
        role: Option<String>,
        /// Initial password (a temporary one is generated when omitted)
        #[arg(long)]
        password: Option<String>,
    },
    /// Update a member's profile or credential
    Update {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        degree: Option<i64>,
        #[arg(long)]
        lodge: Option<String>,
        #[arg(long)]
        role: Option<String>,
        #[arg(long)]
        password: Option<String>,
    },
    /// Approve a pending registration
    Approve { id: String },
    /// Suspend a member and end their sessions
    Suspend { id: String },
    /// Delete a member
    Delete { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let Cli { command } = Cli::parse();

    match command {
        Commands::Login {
            url,
            email,
            password,
            client,
        } => handle_login_command(&url, &email, &password, &client).await,
        Commands::Logout { api } => handle_logout_command(&api).await,
        Commands::Register {
            url,
            name,
            email,
            degree,
            lodge,
            password,
        } => handle_register_command(&url, name, email, degree, lodge, &password).await,
        Commands::Whoami { api } => handle_whoami_command(&api).await,
        Commands::Health { api } => handle_health_command(&api).await,
        Commands::Rituals { command, api } => handle_ritual_command(command, &api).await,
        Commands::Users { command, api } => handle_user_command(command, &api).await,
    }
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Default)]
#[serde(default)]
struct ClientConfig {
    server: Option<String>,
    email: Option<String>,
    session: Option<SessionTokens>,
}

/// A client session backed by the saved config.
struct ClientContext {
    config_path: PathBuf,
    config: ClientConfig,
    cache: SessionCache,
}

impl ClientContext {
    async fn open(api: &ApiArgs) -> Result<Self> {
        let config_path = client_config_path(api.client.client_config.as_deref())?;
        let config = load_client_config(&config_path).await?;
        let server = api
            .server
            .as_deref()
            .or(config.server.as_deref())
            .ok_or_else(|| anyhow::anyhow!("no server configured; run `tylerctl login <url>`"))?;
        let client = ApiClient::new(&normalize_base_url(server)?)?;
        client.install(config.session.clone());
        Ok(Self {
            config_path,
            config,
            cache: SessionCache::new(client),
        })
    }

    fn client(&self) -> &ApiClient {
        self.cache.client()
    }

    /// Resolve the saved session, failing when nobody is signed in.
    async fn require_profile(&mut self) -> Result<Profile> {
        let state = self.cache.initialize().await;
        self.persist().await?;
        match state {
            AuthState::Authenticated { profile, .. } => Ok(profile),
            _ => anyhow::bail!("not signed in (or the session expired); run `tylerctl login`"),
        }
    }

    /// Save tokens the server rotated or the cache cleared.
    async fn persist(&mut self) -> Result<()> {
        let tokens = self.client().tokens();
        if tokens != self.config.session {
            self.config.session = tokens;
            save_client_config(&self.config_path, &self.config).await?;
        }
        Ok(())
    }
}

async fn handle_login_command(
    url: &str,
    email: &str,
    password: &PasswordArgs,
    client: &ClientConfigArgs,
) -> Result<()> {
    let password = read_password(password)?;
    let base_url = normalize_base_url(url)?;
    let config_path = client_config_path(client.client_config.as_deref())?;

    let cache = SessionCache::new(ApiClient::new(&base_url)?);
    if !cache.sign_in(email, &password).await {
        anyhow::bail!(
            "sign-in failed: check the email and password; new accounts need administrator approval"
        );
    }
    let profile = cache
        .state()
        .profile()
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("sign-in did not produce a profile"))?;

    let mut config = load_client_config(&config_path).await?;
    config.server = Some(base_url.clone());
    config.email = Some(profile.email.clone());
    config.session = cache.client().tokens();
    save_client_config(&config_path, &config).await?;

    println!("Signed in as {} <{}>", profile.name, profile.email);
    println!("  Server: {base_url}");
    println!("  Role: {}, degree {}", profile.role, degree_label(profile.degree));
    println!("Client config: {}", config_path.display());
    Ok(())
}

async fn handle_logout_command(api: &ApiArgs) -> Result<()> {
    let mut ctx = ClientContext::open(api).await?;
    ctx.cache.sign_out().await;
    ctx.persist().await?;
    println!("Signed out");
    Ok(())
}

async fn handle_register_command(
    url: &str,
    name: String,
    email: String,
    degree: Option<i64>,
    lodge: Option<String>,
    password: &PasswordArgs,
) -> Result<()> {
    let password = read_password(password)?;
    let client = ApiClient::new(&normalize_base_url(url)?)?;
    let response = client
        .register(&RegisterRequest {
            name,
            email,
            password,
            degree,
            lodge,
        })
        .await?;

    println!("Registered {} <{}>", response.user.name, response.user.email);
    if response.pending_approval {
        println!("The account is awaiting administrator approval.");
    }
    Ok(())
}

async fn handle_whoami_command(api: &ApiArgs) -> Result<()> {
    let mut ctx = ClientContext::open(api).await?;
    let profile = ctx.require_profile().await?;

    println!("ID: {}", profile.id);
    println!("Name: {}", profile.name);
    println!("Email: {}", profile.email);
    println!("Role: {}", profile.role);
    println!("Degree: {}", degree_label(profile.degree));
    if let Some(lodge) = &profile.lodge {
        println!("Lodge: {lodge}");
    }
    Ok(())
}

async fn handle_health_command(api: &ApiArgs) -> Result<()> {
    let ctx = ClientContext::open(api).await?;
    let health = ctx.client().health().await.context("health request failed")?;

    println!("Status: {}", health.status);
    println!("Server version: {}", health.version);
    println!("Client version: {}", env!("CARGO_PKG_VERSION"));

    if health.version != env!("CARGO_PKG_VERSION") {
        eprintln!(
            "Warning: version mismatch (server: {}, client: {})",
            health.version,
            env!("CARGO_PKG_VERSION")
        );
    }
    Ok(())
}

async fn handle_ritual_command(command: RitualCommands, api: &ApiArgs) -> Result<()> {
    let mut ctx = ClientContext::open(api).await?;
    ctx.require_profile().await?;

    match command {
        RitualCommands::List {
            degree,
            system,
            language,
            organize_by,
        } => {
            let response = ctx
                .client()
                .list_rituals(&RitualQuery {
                    degree,
                    system,
                    language,
                    organize_by,
                })
                .await?;
            match response.groups {
                Some(groups) => {
                    for (group, rituals) in groups {
                        println!("{group}:");
                        for ritual in &rituals {
                            println!("  {}", ritual_line(ritual));
                        }
                    }
                }
                None if response.rituals.is_empty() => println!("No rituals"),
                None => {
                    for ritual in &response.rituals {
                        println!("{}", ritual_line(ritual));
                    }
                }
            }
        }
        RitualCommands::Show { id } => {
            let ritual = ctx.client().get_ritual(&id).await?;
            println!("ID: {}", ritual.id);
            println!("Name: {}", ritual.name);
            println!("Degree: {}", degree_label(ritual.degree));
            println!("System: {}", ritual.system);
            println!("Language: {}", ritual.language);
            println!("Author: {}", ritual.author);
            println!("File: {}", ritual.file_url);
            if let Some(size) = ritual.size {
                println!("Size: {size} bytes");
            }
        }
        RitualCommands::Stats => {
            let stats = ctx.client().ritual_stats().await?;
            println!("Total: {}", stats.total);
            for (degree, count) in &stats.by_degree {
                println!("  Degree {degree}: {count}");
            }
        }
        RitualCommands::Delete { id } => {
            ctx.client().delete_ritual(&id).await?;
            println!("Deleted ritual {id}");
        }
    }

    ctx.persist().await
}

async fn handle_user_command(command: UserCommands, api: &ApiArgs) -> Result<()> {
    let mut ctx = ClientContext::open(api).await?;
    ctx.require_profile().await?;

    match command {
        UserCommands::List => {
            for user in ctx.client().list_users().await? {
                println!(
                    "{}  {:<5}  {:>3}  {} <{}>",
                    user.id,
                    user.role.to_string(),
                    degree_label(user.degree),
                    user.name,
                    user.email
                );
            }
        }
        UserCommands::Create {
            name,
            email,
            degree,
            lodge,
            role,
            password,
        } => {
            let response = ctx
                .client()
                .create_user(&CreateUserRequest {
                    name,
                    email,
                    password,
                    degree,
                    lodge,
                    role,
                })
                .await?;
            println!("Created {} ({})", response.user.email, response.user.id);
            if let Some(temporary) = response.temporary_password {
                println!("Temporary password: {temporary}");
            }
        }
        UserCommands::Update {
            id,
            name,
            email,
            degree,
            lodge,
            role,
            password,
        } => {
            let user = ctx
                .client()
                .update_user(
                    &id,
                    &UpdateUserRequest {
                        name,
                        email,
                        degree,
                        lodge,
                        role,
                        password,
                        confirmed: None,
                    },
                )
                .await?;
            println!("Updated {} ({})", user.email, user.id);
        }
        UserCommands::Approve { id } => {
            let user = ctx
                .client()
                .update_user(
                    &id,
                    &UpdateUserRequest {
                        confirmed: Some(true),
                        ..Default::default()
                    },
                )
                .await?;
            println!("Approved {}", user.email);
        }
        UserCommands::Suspend { id } => {
            let user = ctx
                .client()
                .update_user(
                    &id,
                    &UpdateUserRequest {
                        confirmed: Some(false),
                        ..Default::default()
                    },
                )
                .await?;
            println!("Suspended {}", user.email);
        }
        UserCommands::Delete { id } => {
            ctx.client().delete_user(&id).await?;
            println!("Deleted user {id}");
        }
    }

    ctx.persist().await
}

fn ritual_line(ritual: &Ritual) -> String {
    format!(
        "{}  {:>3}  {:<12}  {:<10}  {}",
        ritual.id,
        degree_label(ritual.degree),
        ritual.system,
        ritual.language,
        ritual.name
    )
}

fn degree_label(degree: Option<i32>) -> String {
    degree.map_or_else(|| "-".to_string(), |d| d.to_string())
}

fn client_config_path(explicit: Option<&str>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(PathBuf::from(path));
    }

    if let Some(path) = std::env::var_os("TYLER_CLIENT_CONFIG") {
        return Ok(PathBuf::from(path));
    }

    let base = match std::env::var_os("XDG_CONFIG_HOME") {
        Some(path) => PathBuf::from(path),
        None => {
            let home = std::env::var_os("HOME")
                .ok_or_else(|| anyhow::anyhow!("HOME not set; set TYLER_CLIENT_CONFIG"))?;
            PathBuf::from(home).join(".config")
        }
    };

    Ok(base.join("tyler").join("client.toml"))
}

async fn load_client_config(path: &Path) -> Result<ClientConfig> {
    let mut figment = Figment::new();

    if path.exists() {
        figment = figment.merge(Toml::file(path));
    }

    figment = figment.merge(Env::prefixed("TYLER_CLIENT__").split("__"));

    match figment.extract() {
        Ok(config) => Ok(config),
        Err(_) if !path.exists() => Ok(ClientConfig::default()),
        Err(err) => Err(anyhow::anyhow!(err).context("failed to load client configuration")),
    }
}

async fn save_client_config(path: &Path, config: &ClientConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let contents = toml::to_string_pretty(config)?;

    tokio::fs::write(path, contents).await?;

    // The file holds session tokens.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(path, perms).await?;
    }

    Ok(())
}

fn read_password(args: &PasswordArgs) -> Result<String> {
    if let Some(password) = &args.password {
        return Ok(password.clone());
    }
    if args.password_stdin {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        let password = buf.trim_end_matches(['\r', '\n']).to_string();
        if password.is_empty() {
            anyhow::bail!("password read from stdin is empty");
        }
        return Ok(password);
    }
    anyhow::bail!("password required: use --password or --password-stdin");
}

fn normalize_base_url(url: &str) -> Result<String> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        anyhow::bail!("server URL must start with http:// or https://");
    }
    Ok(url.trim_end_matches('/').to_string())
}
