//! `cadre run`: line-oriented chat with a team.
//!
//! Lines starting with `/` are commands: `/exit`, `/summarize`,
//! `/agent <name>`, `/usage`, or one of the active agent's named prompts.

use anyhow::Context;
use cadre_agent::{Agent, LocalRuntime, Runtime, RuntimeError, Session, SessionMessage};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info};

use super::{Interrupt, TeamArgs, shutdown};
use crate::render;

/// What a line of input asks for.
#[derive(Debug, PartialEq)]
enum Input<'a> {
    Empty,
    Exit,
    Summarize,
    Usage,
    SwitchAgent(&'a str),
    Prompt(String),
    Unknown(&'a str),
}

fn parse_input<'a>(line: &'a str, agent: &Agent) -> Input<'a> {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Prompt(line.to_string());
    };
    let (name, rest) = command
        .split_once(char::is_whitespace)
        .map_or((command, ""), |(name, rest)| (name, rest.trim()));
    match name {
        "exit" | "quit" => Input::Exit,
        "summarize" | "compact" => Input::Summarize,
        "usage" => Input::Usage,
        "agent" if !rest.is_empty() => Input::SwitchAgent(rest),
        _ => match agent.commands().get(name) {
            Some(prompt) if rest.is_empty() => Input::Prompt(prompt.clone()),
            Some(prompt) => Input::Prompt(format!("{prompt}\n\n{rest}")),
            None => Input::Unknown(name),
        },
    }
}

pub async fn run(args: TeamArgs) -> anyhow::Result<()> {
    let loaded = args.load()?;
    let runtime = args.runtime(&loaded)?;
    let _ = render::attach(runtime.events(), render::default_factory());

    let mut session = Session::new()
        .with_title("Interactive session")
        .with_working_dir(loaded.config.working_dir.clone())
        .with_tools_approved(true);

    greet(&runtime);
    let interrupt = Interrupt::install();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout
            .write_all(format!("{} > ", runtime.current_agent().name()).as_bytes())
            .await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await.context("Failed to read input")? else {
            break;
        };

        let agent = runtime.current_agent();
        match parse_input(&line, &agent) {
            Input::Empty => continue,
            Input::Exit => break,
            Input::Usage => println!(
                "tokens: {} in / {} out, cost: {:.4}",
                session.input_tokens, session.output_tokens, session.cost
            ),
            Input::SwitchAgent(name) => match runtime.set_current_agent(name) {
                Ok(()) => greet(&runtime),
                Err(e) => eprintln!("{e}"),
            },
            Input::Unknown(name) => eprintln!("unknown command /{name}"),
            Input::Summarize => {
                match runtime.summarize(&mut session, &interrupt.next_turn()).await {
                    Ok(summary) if summary.is_empty() => eprintln!("nothing to summarize"),
                    Ok(summary) => println!("{summary}"),
                    Err(e) => report(&e),
                }
            }
            Input::Prompt(prompt) => {
                session.add_message(SessionMessage::user_message(loaded.filename.clone(), prompt));
                match runtime.run(&mut session, &interrupt.next_turn()).await {
                    Ok(answer) => println!("{answer}\n"),
                    Err(e) => report(&e),
                }
            }
        }
    }

    shutdown(&loaded.team).await;
    info!(
        session_id = %session.id,
        input_tokens = session.input_tokens,
        output_tokens = session.output_tokens,
        "Session ended"
    );
    Ok(())
}

fn greet(runtime: &LocalRuntime) {
    let agent = runtime.current_agent();
    if !agent.welcome_message().is_empty() {
        println!("{}\n", agent.welcome_message());
    }
}

fn report(e: &RuntimeError) {
    match e {
        RuntimeError::Cancelled => eprintln!("cancelled"),
        other => error!(error = %other, "Turn failed"),
    }
}
