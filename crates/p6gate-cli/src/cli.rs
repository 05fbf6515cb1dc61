use clap::{ArgGroup, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "p6gate")]
#[command(about = "Session broker for the Primavera P6 REST API")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Log in to P6 and store a new session
    Login {
        username: String,
        /// P6 database name
        database: String,
        /// Keep the credentials so the session can be renewed automatically
        #[arg(long)]
        remember: bool,
        /// Password (prompted for when not given)
        #[arg(long, env = "P6_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Forward a request to the P6 API
    Call {
        /// GET, POST, PUT, PATCH or DELETE
        method: String,
        /// Path relative to the API base, e.g. /project
        path: String,
        #[arg(long)]
        session: Option<String>,
        /// Query parameter; repeat a key to send it more than once
        #[arg(short, long = "query", value_name = "KEY=VALUE", value_parser = parse_key_value)]
        query: Vec<(String, String)>,
        #[arg(short = 'H', long = "header", value_name = "NAME=VALUE", value_parser = parse_key_value)]
        header: Vec<(String, String)>,
        /// Request body; sent as JSON when it parses, as text otherwise
        #[arg(long)]
        body: Option<String>,
    },

    /// List stored sessions
    Sessions,

    /// Show the session used when no id is given
    Active,

    /// Remove a stored session
    Logout { session_id: String },

    /// Remove every stored session
    Clear {
        /// Also delete the keychain passphrase used to seal credentials
        #[arg(long)]
        forget_key: bool,
    },

    /// Check whether P6 still accepts a session
    Probe { session_id: Option<String> },

    /// Find OBS nodes by name substring
    ObsFind {
        query: String,
        #[arg(long)]
        session: Option<String>,
        #[arg(long)]
        limit: Option<u32>,
    },

    /// List projects
    Projects {
        /// P6 filter expression, e.g. "Status='Active'"
        #[arg(long)]
        filter: Option<String>,
        #[arg(long)]
        fields: Option<String>,
        #[arg(long)]
        session: Option<String>,
        #[arg(long)]
        limit: Option<u32>,
    },

    /// List projects under an OBS node
    #[command(group(ArgGroup::new("obs").required(true).args(["name", "id"])))]
    ProjectsByObs {
        /// Exact OBS name
        #[arg(long)]
        name: Option<String>,
        /// OBS ObjectId
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        session: Option<String>,
        #[arg(long)]
        limit: Option<u32>,
    },

    /// Print the effective configuration
    Config {
        /// Write it to the config file
        #[arg(long)]
        save: bool,
    },
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("Filter=Name='A=B'").unwrap(),
            ("Filter".to_string(), "Name='A=B'".to_string())
        );
        assert_eq!(parse_key_value("Empty=").unwrap().1, "");
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_projects_by_obs_requires_reference() {
        assert!(Cli::try_parse_from(["p6gate", "projects-by-obs"]).is_err());
        let cli = Cli::try_parse_from(["p6gate", "projects-by-obs", "--name", "Ops"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::ProjectsByObs { name: Some(_), id: None, .. }
        ));
    }
}
