use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use reqwest::header::{HeaderMap, HeaderValue, LOCATION};
use reqwest::StatusCode;
use serde_json::Value;

const UPLOAD_OFFSET: &str = "upload-offset";
const UPLOAD_LENGTH: &str = "upload-length";
const UPLOAD_FILENAME: &str = "upload-filename";

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Client for the API gateway", long_about = None)]
struct Cli {
    /// Gateway base URL including the API prefix.
    #[arg(short, long, default_value = "http://localhost:8080/api/v1")]
    url: String,

    /// API key sent as X-API-KEY.
    #[arg(short, long)]
    key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Kind {
    Dataset,
    Module,
}

impl Kind {
    fn collection(self) -> &'static str {
        match self {
            Kind::Dataset => "datasets",
            Kind::Module => "modules",
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the gateway answers
    Status,
    /// Upload a file in chunks, resuming where the server left off
    Upload {
        #[arg(long, value_enum, default_value = "dataset")]
        kind: Kind,
        /// Owner user id
        #[arg(long)]
        user: String,
        /// Dataset or module id
        #[arg(long)]
        id: String,
        file: PathBuf,
        #[arg(long, default_value_t = 1024 * 1024)]
        chunk_size: usize,
        /// Session URL from an earlier, interrupted upload
        #[arg(long)]
        resume: Option<String>,
    },
    /// Fetch a path below the API prefix (blob or listing)
    Download {
        path: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut headers = HeaderMap::new();
    if let Some(key) = &cli.key {
        headers.insert("x-api-key", HeaderValue::from_str(key)?);
    }
    let client = reqwest::Client::builder().default_headers(headers).build()?;
    let base = cli.url.trim_end_matches('/').to_string();

    match cli.command {
        Commands::Status => {
            let res = client.get(format!("{base}/")).send().await?;
            let status = res.status();
            println!("{status}: {}", res.text().await?.trim());
        }
        Commands::Upload {
            kind,
            user,
            id,
            file,
            chunk_size,
            resume,
        } => {
            let data = tokio::fs::read(&file).await?;
            let session = match resume {
                Some(url) => url,
                None => create_session(&client, &base, kind, &user, &id, &file, data.len()).await?,
            };
            upload(&client, &base, &session, &data, chunk_size.max(1)).await?;
            println!("uploaded {} bytes via {session}", data.len());
        }
        Commands::Download { path, output } => {
            let res = client
                .get(format!("{base}/{}", path.trim_start_matches('/')))
                .send()
                .await?;
            if !res.status().is_success() {
                return Err(format!("download failed: {}", res.status()).into());
            }
            let is_listing = res
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v.starts_with("application/json"));
            let body = res.bytes().await?;

            if is_listing {
                let entries: Value = serde_json::from_slice(&body)?;
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if let Some(output) = output {
                tokio::fs::write(&output, &body).await?;
                println!("wrote {} bytes to {}", body.len(), output.display());
            } else {
                use std::io::Write;
                std::io::stdout().write_all(&body)?;
            }
        }
    }

    Ok(())
}

async fn create_session(
    client: &reqwest::Client,
    base: &str,
    kind: Kind,
    user: &str,
    id: &str,
    file: &std::path::Path,
    length: usize,
) -> Result<String, Box<dyn std::error::Error>> {
    let mut req = client
        .post(format!("{base}/{}/{user}/{id}/upload", kind.collection()))
        .header(UPLOAD_LENGTH, length);
    if let Some(name) = file.file_name().and_then(|n| n.to_str()) {
        req = req.header(UPLOAD_FILENAME, name);
    }

    let res = req.send().await?;
    if res.status() != StatusCode::CREATED {
        return Err(format!("create failed: {}", res.status()).into());
    }
    let location = res
        .headers()
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .ok_or("create response has no Location")?;

    // Location is an absolute path on the gateway's origin
    let origin = reqwest::Url::parse(base)?;
    Ok(origin.join(location)?.to_string())
}

async fn current_offset(client: &reqwest::Client, session: &str) -> Result<u64, Box<dyn std::error::Error>> {
    let res = client.head(session).send().await?;
    if !res.status().is_success() {
        return Err(format!("status failed: {}", res.status()).into());
    }
    let offset = res
        .headers()
        .get(UPLOAD_OFFSET)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .ok_or("status response has no Upload-Offset")?;
    Ok(offset)
}

async fn upload(
    client: &reqwest::Client,
    base: &str,
    session: &str,
    data: &[u8],
    chunk_size: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let session = if session.starts_with("http") {
        session.to_string()
    } else {
        format!("{base}/{}", session.trim_start_matches('/'))
    };

    let mut offset = current_offset(client, &session).await?;
    if offset > 0 {
        eprintln!("resuming at byte {offset}");
    }

    if data.is_empty() && offset == 0 {
        let res = client.patch(&session).header(UPLOAD_OFFSET, 0u64).send().await?;
        if res.status() != StatusCode::NO_CONTENT {
            return Err(format!("append failed: {}", res.status()).into());
        }
    }

    while (offset as usize) < data.len() {
        let start = offset as usize;
        let end = (start + chunk_size).min(data.len());
        let res = client
            .patch(&session)
            .header(UPLOAD_OFFSET, offset)
            .body(data[start..end].to_vec())
            .send()
            .await?;

        match res.status() {
            StatusCode::NO_CONTENT => offset = end as u64,
            // another writer moved the offset; ask the server where it is
            StatusCode::CONFLICT => {
                let server_offset = current_offset(client, &session).await?;
                if server_offset == offset {
                    return Err(format!("upload session no longer accepts data at {offset}").into());
                }
                offset = server_offset;
            }
            other => return Err(format!("append failed at {offset}: {other}").into()),
        }
        eprintln!("{offset}/{} bytes", data.len());
    }
    Ok(())
}
