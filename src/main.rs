use chrono::Utc;
use futures::StreamExt;
use genwaterfall::logger::{self, LoggerConfig};
use genwaterfall::{
    ChatMode, ChatRequest, EditRequest, GenError, GenerateRequest, GenerationOrchestrator,
    GenerationResult, ImageBlob, OrchestratorConfig, QualityTier, Resolution,
};
use std::env;
use std::fs;
use std::io::{self, Write};

const USAGE: &str = "usage:
  genwaterfall [--pro] [--8k] <prompt>
  genwaterfall --edit <image>... -- <instruction>
  genwaterfall --chat [--thinking] <message>";

enum Command {
    Generate(GenerateRequest),
    Edit(EditRequest),
    Chat(ChatRequest),
}

fn parse_args(args: Vec<String>) -> Result<Command, Box<dyn std::error::Error>> {
    let mut pro = false;
    let mut eight_k = false;
    let mut thinking = false;
    let mut mode = "generate";
    let mut images = Vec::new();
    let mut words = Vec::new();
    let mut in_instruction = false;

    for arg in args {
        match arg.as_str() {
            "--pro" if !in_instruction => pro = true,
            "--8k" if !in_instruction => eight_k = true,
            "--thinking" if !in_instruction => thinking = true,
            "--chat" if !in_instruction => mode = "chat",
            "--edit" if !in_instruction => mode = "edit",
            "--" if mode == "edit" => in_instruction = true,
            _ if mode == "edit" && !in_instruction => {
                let raw = fs::read(&arg)?;
                images.push(ImageBlob::from_bytes(&raw));
            }
            _ => words.push(arg),
        }
    }

    let text = words.join(" ");
    if text.trim().is_empty() {
        return Err(USAGE.into());
    }

    Ok(match mode {
        "chat" => {
            let mode = if thinking {
                ChatMode::Thinking
            } else {
                ChatMode::Fast
            };
            Command::Chat(ChatRequest::new(text).with_mode(mode))
        }
        "edit" => Command::Edit(EditRequest::new(images, text)),
        _ => {
            let mut request = GenerateRequest::new(text);
            if pro {
                request = request.with_quality_tier(QualityTier::Pro);
            }
            if eight_k {
                request = request.with_resolution(Resolution::R8K);
            }
            Command::Generate(request)
        }
    })
}

fn save_images(result: &GenerationResult) -> Result<(), Box<dyn std::error::Error>> {
    log::info!(
        "Served by {} (degraded: {}, synthetic: {})",
        result.served_by,
        result.degraded,
        result.synthetic
    );

    let stamp = Utc::now().format("%Y%m%d_%H%M%S");
    for (i, image) in result.artifacts.iter().enumerate() {
        let filename = format!("generated_{}_{}.{}", stamp, i, image.extension());
        fs::write(&filename, image.decode()?)?;
        log::info!("Saved {} ({})", filename, image.mime_type);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let dotenv_loaded = dotenv::dotenv().is_ok();

    logger::init_with_config(LoggerConfig::from_env())?;
    if !dotenv_loaded {
        log::warn!("No .env file found, using system environment variables");
    }

    let command = parse_args(env::args().skip(1).collect())?;

    let config = OrchestratorConfig::from_env()?;
    logger::log_startup_info(
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        config.bedrock.region.as_deref(),
    );

    let orchestrator = GenerationOrchestrator::from_config(config).await?;
    logger::log_catalog_info(orchestrator.catalog());

    let outcome = match command {
        Command::Generate(request) => match orchestrator.generate(request).await {
            Ok(result) => save_images(&result),
            Err(e) => Err(e.into()),
        },
        Command::Edit(request) => match orchestrator.edit(request).await {
            Ok(result) => save_images(&result),
            Err(e) => Err(e.into()),
        },
        Command::Chat(request) => stream_chat(&orchestrator, request).await,
    };

    if let Err(e) = outcome {
        match e.downcast_ref::<GenError>() {
            Some(gen_error) => {
                log::error!("{}", gen_error.diagnostic());
                eprintln!("{}", gen_error.user_message());
            }
            None => log::error!("{}", e),
        }
        std::process::exit(1);
    }
    Ok(())
}

async fn stream_chat(
    orchestrator: &GenerationOrchestrator,
    request: ChatRequest,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut chat = orchestrator.chat(request).await?;
    if chat.degraded {
        log::warn!("Chat answered by fallback model {}", chat.served_by);
    }

    let mut stdout = io::stdout();
    let mut chars = 0;
    while let Some(chunk) = chat.stream.next().await {
        let text = chunk?;
        chars += text.len();
        write!(stdout, "{}", text)?;
        stdout.flush()?;
    }
    writeln!(stdout)?;
    log::info!("Streamed {} characters from {}", chars, chat.served_by);
    Ok(())
}
