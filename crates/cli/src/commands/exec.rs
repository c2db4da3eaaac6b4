//! `cadre exec`: one message in, one answer out.

use anyhow::Context;
use cadre_agent::{Runtime, Session};
use tokio::io::AsyncReadExt;
use tracing::info;

use super::{Interrupt, TeamArgs, shutdown};
use crate::render;

pub async fn run(args: TeamArgs, max_iterations: u32, message: Vec<String>) -> anyhow::Result<()> {
    let message = if message.is_empty() {
        let mut input = String::new();
        tokio::io::stdin()
            .read_to_string(&mut input)
            .await
            .context("Failed to read the message from stdin")?;
        input
    } else {
        message.join(" ")
    };
    let message = message.trim();
    anyhow::ensure!(!message.is_empty(), "No message given");

    let loaded = args.load()?;
    let runtime = args.runtime(&loaded)?;
    let _ = render::attach(runtime.events(), render::default_factory());

    let mut session = Session::new()
        .with_working_dir(loaded.config.working_dir.clone())
        .with_max_iterations(max_iterations)
        .with_tools_approved(true)
        .with_user_message(loaded.filename.clone(), message);

    let interrupt = Interrupt::install();
    let result = runtime.run(&mut session, &interrupt.current()).await;
    shutdown(&loaded.team).await;

    let answer = result.context("Run failed")?;
    info!(
        input_tokens = session.input_tokens,
        output_tokens = session.output_tokens,
        cost = session.cost,
        "Run finished"
    );
    println!("{answer}");
    Ok(())
}
