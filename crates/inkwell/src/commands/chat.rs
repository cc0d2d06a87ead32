//! Chat command - one prompt, streamed reply.

use std::io::Write;

use anyhow::{Result, anyhow};
use clap::Args;
use console::Style;
use inkwell_llm::{ChatChunk, ChatRequest, ChatResponse};

use super::Context;

/// Arguments for the chat command.
#[derive(Args, Debug)]
pub struct ChatArgs {
    /// The prompt to send
    #[arg(required = true)]
    pub prompt: String,

    /// System prompt
    #[arg(short, long)]
    pub system: Option<String>,

    /// Model to request instead of the provider default
    #[arg(short, long)]
    pub model: Option<String>,

    /// Sampling temperature
    #[arg(short, long)]
    pub temperature: Option<f32>,

    /// Wait for the whole reply instead of streaming it
    #[arg(long)]
    pub no_stream: bool,

    /// Print the model's reasoning as well as its answer
    #[arg(long)]
    pub show_thinking: bool,
}

fn build_request(args: &ChatArgs) -> ChatRequest {
    let mut request = ChatRequest::from_prompt(args.prompt.clone()).with_stream(!args.no_stream);
    if let Some(system) = &args.system {
        request = request.with_system(system.clone());
    }
    if let Some(model) = &args.model {
        request = request.with_model(model.clone());
    }
    if let Some(temperature) = args.temperature {
        request = request.with_temperature(temperature);
    }
    request
}

/// Run the chat command.
pub async fn run(args: ChatArgs, ctx: &Context) -> Result<()> {
    let manager = &ctx.app.manager;
    let provider = ctx.provider.as_deref();
    let request = build_request(&args);
    let dim = Style::new().dim();

    if ctx.verbose {
        let target = provider
            .map(str::to_string)
            .or_else(|| manager.default_provider())
            .unwrap_or_else(|| "none".to_string());
        eprintln!("{}", dim.apply_to(format!("Provider: {target}")));
    }

    let response = if args.no_stream {
        let response = manager.chat(provider, request, &ctx.cancel).await;
        if response.is_success() {
            if args.show_thinking
                && let Some(reasoning) = &response.reasoning
            {
                println!("{}", dim.apply_to(reasoning));
                println!();
            }
            println!("{}", response.content);
        }
        response
    } else {
        let mut printer = ChunkPrinter::new(args.show_thinking);
        let response = manager
            .chat_stream_with(provider, request, ctx.cancel.clone(), |chunk| {
                printer.print(chunk)
            })
            .await;
        printer.finish();
        response
    };

    report(&response, ctx.verbose)
}

/// Writes streamed chunks to stdout, reasoning dimmed.
struct ChunkPrinter {
    show_thinking: bool,
    thinking: bool,
    has_output: bool,
    dim: Style,
}

impl ChunkPrinter {
    fn new(show_thinking: bool) -> Self {
        Self {
            show_thinking,
            thinking: false,
            has_output: false,
            dim: Style::new().dim(),
        }
    }

    fn print(&mut self, chunk: &ChatChunk) {
        let mut stdout = std::io::stdout();
        if self.show_thinking
            && let Some(reasoning) = chunk.reasoning.as_deref().filter(|r| !r.is_empty())
        {
            self.thinking = true;
            let _ = write!(stdout, "{}", self.dim.apply_to(reasoning));
        }
        if !chunk.content.is_empty() {
            if self.thinking {
                self.thinking = false;
                let _ = write!(stdout, "\n\n");
            }
            let _ = write!(stdout, "{}", chunk.content);
            self.has_output = true;
        }
        let _ = stdout.flush();
    }

    fn finish(&self) {
        if self.has_output || self.thinking {
            println!();
        }
    }
}

fn report(response: &ChatResponse, verbose: bool) -> Result<()> {
    if response.is_cancelled() {
        return Err(anyhow!("cancelled"));
    }
    if !response.is_success() {
        let red = Style::new().red();
        eprintln!("{} {}", red.apply_to("Error:"), response.error_message());
        return Err(anyhow!(response.error_message().to_string()));
    }
    if verbose {
        let dim = Style::new().dim();
        let mut line = format!(
            "{} in {:.2}s",
            response.model,
            response.response_time.as_secs_f64()
        );
        if let Some(usage) = &response.usage {
            line.push_str(&format!(
                ", {} prompt + {} completion tokens",
                usage.prompt_tokens, usage.completion_tokens
            ));
        }
        eprintln!("{}", dim.apply_to(line));
    }
    Ok(())
}
