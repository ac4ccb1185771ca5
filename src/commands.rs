//! Command handlers for the ltm CLI.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use base64::Engine as _;
use ltm_engine::{
    Config, Error, LtmService, MemoryEntry, Persona, PromptPayload, RetrieveOptions,
    GLOBAL_PERSONA,
};

use crate::output::*;

struct ChatRequest<'a> {
    model: &'a str,
    message: &'a str,
    system: Option<&'a str>,
    persona: Option<&'a str>,
    isolate: bool,
    reasoning: bool,
    context_length: Option<u32>,
    image: Option<&'a Path>,
}

/// Commands supported by the ltm CLI.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Store a memory
    Ingest {
        /// Memory text
        text: String,

        /// Tag to attach (repeatable)
        #[arg(short = 't', long = "tag")]
        tags: Vec<String>,

        /// Persona that owns the memory
        #[arg(short = 'p', long, default_value = GLOBAL_PERSONA)]
        persona: String,
    },
    /// Find memories relevant to a query
    Retrieve {
        /// Query text
        query: String,

        /// Maximum number of results (default: 5)
        #[arg(short = 'l', long, default_value = "5")]
        limit: usize,

        /// Persona to scope the search to
        #[arg(short = 'p', long)]
        persona: Option<String>,

        /// Only return memories of the persona and Global
        #[arg(long)]
        isolate: bool,
    },
    /// Show one memory
    Get {
        /// Memory ID
        id: i64,
    },
    /// List the most recent memories
    List {
        /// Maximum number of results (default: 10)
        #[arg(short = 'l', long, default_value = "10")]
        limit: usize,

        /// Only list memories of this persona
        #[arg(short = 'p', long)]
        persona: Option<String>,
    },
    /// Delete every memory
    Clear {
        /// Confirm deletion
        #[arg(long)]
        yes: bool,
    },
    /// Send one message to a model and stream the reply
    Chat {
        /// Model identifier
        model: String,

        /// User message
        message: String,

        /// Base system prompt
        #[arg(short = 's', long)]
        system: Option<String>,

        /// Persona name
        #[arg(short = 'p', long)]
        persona: Option<String>,

        /// Only use memories of the persona and Global
        #[arg(long)]
        isolate: bool,

        /// Allow visible reasoning
        #[arg(long)]
        reasoning: bool,

        /// Context window in tokens
        #[arg(long)]
        context_length: Option<u32>,

        /// Image file to attach
        #[arg(short = 'i', long)]
        image: Option<PathBuf>,
    },
    Version,
}

/// Execute a CLI command.
pub async fn execute(command: &Commands, config: &Config, json: bool) -> Result<ExitCode, Error> {
    match command {
        Commands::Version => return handle_version(json),
        Commands::Clear { yes: false } => {
            return Err(Error::InvalidInput(
                "clear deletes every memory; pass --yes to confirm".to_string(),
            ));
        }
        _ => {}
    }

    let service = LtmService::open(config).await?;
    match command {
        Commands::Ingest {
            text,
            tags,
            persona,
        } => handle_ingest(&service, text, tags, persona, json).await,
        Commands::Retrieve {
            query,
            limit,
            persona,
            isolate,
        } => {
            let options = RetrieveOptions {
                persona: persona.clone(),
                isolate: *isolate,
            };
            handle_retrieve(&service, query, *limit, &options, json).await
        }
        Commands::Get { id } => handle_get(&service, *id, json).await,
        Commands::List { limit, persona } => {
            handle_list(&service, *limit, persona.as_deref(), json).await
        }
        Commands::Clear { .. } => handle_clear(&service, json).await,
        Commands::Chat {
            model,
            message,
            system,
            persona,
            isolate,
            reasoning,
            context_length,
            image,
        } => {
            let request = ChatRequest {
                model,
                message,
                system: system.as_deref(),
                persona: persona.as_deref(),
                isolate: *isolate,
                reasoning: *reasoning,
                context_length: *context_length,
                image: image.as_deref(),
            };
            handle_chat(&service, &request, json).await
        }
        Commands::Version => handle_version(json),
    }
}

async fn handle_ingest(
    service: &LtmService,
    text: &str,
    tags: &[String],
    persona: &str,
    json: bool,
) -> Result<ExitCode, Error> {
    let id = service.ingest(text, tags, persona).await?;
    if json {
        print_json(&IngestResponse {
            status: "ingested".to_string(),
            id,
        });
    } else {
        println!("Ingested memory: {}", id);
    }
    Ok(ExitCode::SUCCESS)
}

async fn handle_retrieve(
    service: &LtmService,
    query: &str,
    limit: usize,
    options: &RetrieveOptions,
    json: bool,
) -> Result<ExitCode, Error> {
    let memories = service.retrieve(query, limit, options).await?;
    if json {
        let results: Vec<RetrievedItem> = memories
            .into_iter()
            .map(|m| RetrievedItem {
                id: m.id,
                text: m.text,
                tags: m.tags,
                persona: m.persona,
                distance: m.distance,
                created_at: format_timestamp(m.created_at),
            })
            .collect();
        print_json(&RetrieveResponse { results });
    } else {
        for memory in memories {
            println!(
                "{} [{}] [distance: {:.3}]\n  {}\n",
                memory.id, memory.persona, memory.distance, memory.text
            );
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn entry_response(entry: MemoryEntry) -> GetResponse {
    GetResponse {
        id: entry.id,
        text: entry.text,
        tags: entry.tags,
        persona: entry.persona,
        created_at: format_timestamp(entry.created_at),
    }
}

async fn handle_get(service: &LtmService, id: i64, json: bool) -> Result<ExitCode, Error> {
    let entry = service
        .store()
        .get(id)
        .await?
        .ok_or_else(|| Error::NotFound(id.to_string()))?;
    if json {
        print_json(&entry_response(entry));
    } else {
        println!("ID: {}", entry.id);
        println!("Text: {}", entry.text);
        println!("Persona: {}", entry.persona);
        if !entry.tags.is_empty() {
            println!("Tags: {}", entry.tags.join(", "));
        }
        println!("Created: {}", format_timestamp(entry.created_at));
    }
    Ok(ExitCode::SUCCESS)
}

async fn handle_list(
    service: &LtmService,
    limit: usize,
    persona: Option<&str>,
    json: bool,
) -> Result<ExitCode, Error> {
    let entries = service.store().list_recent(limit, persona).await?;
    if json {
        let memories = entries.into_iter().map(entry_response).collect();
        print_json(&ListResponse { memories });
    } else {
        for entry in entries {
            println!("{} [{}]: {}", entry.id, entry.persona, entry.text);
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn handle_clear(service: &LtmService, json: bool) -> Result<ExitCode, Error> {
    let deleted = service.clear().await?;
    if json {
        print_json(&ClearResponse {
            status: "cleared".to_string(),
            deleted,
        });
    } else {
        println!("Cleared {} memories", deleted);
    }
    Ok(ExitCode::SUCCESS)
}

fn read_image(path: &Path) -> Result<String, Error> {
    if !path.exists() {
        return Err(Error::FileNotFound(path.to_path_buf()));
    }
    let bytes = std::fs::read(path)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}

async fn handle_chat(
    service: &LtmService,
    request: &ChatRequest<'_>,
    json: bool,
) -> Result<ExitCode, Error> {
    let persona_name = request.persona.unwrap_or(GLOBAL_PERSONA);
    let mut persona = Persona::new(persona_name, request.model);
    persona.isolate = request.isolate;
    persona.reasoning = request.reasoning;
    persona.context_length = request.context_length;

    let handle = service
        .create_persona_session(&persona, request.system.unwrap_or_default())
        .await?;

    let mut payload = PromptPayload::for_persona(request.message, &persona);
    payload.image = request.image.map(read_image).transpose()?;

    let reply = service
        .stream_response(payload, |chunk: &str| {
            if !json {
                print!("{}", chunk);
                let _ = std::io::stdout().flush();
            }
        })
        .await?;
    service.shutdown().await;

    if json {
        print_json(&ChatResponse {
            model: handle.model,
            session: handle.id.to_string(),
            reply: reply.clone(),
        });
    } else {
        println!();
    }

    Ok(if reply.is_some() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn handle_version(json: bool) -> Result<ExitCode, Error> {
    if json {
        print_json(&serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "name": env!("CARGO_PKG_NAME")
        }));
    } else {
        println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    }
    Ok(ExitCode::SUCCESS)
}
