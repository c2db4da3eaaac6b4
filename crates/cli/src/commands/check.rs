//! `cadre check`: load a team without running it.

use super::{TeamArgs, shutdown};

pub async fn run(args: TeamArgs) -> anyhow::Result<()> {
    let loaded = args.load()?;
    let team = &loaded.team;

    println!("{}: {} agent(s)", loaded.filename, team.len());
    for agent in team.agents() {
        let models: Vec<String> = agent.models().iter().map(|m| m.id()).collect();
        let tools = agent.tools().await;
        let marker = if agent.name() == team.default_agent().name() { "*" } else { " " };
        println!(
            "{marker} {:<16} models: {}  tools: {}",
            agent.name(),
            models.join(", "),
            tools.len()
        );
        if !agent.sub_agents().is_empty() {
            println!("    sub-agents: {}", agent.sub_agents().join(", "));
        }
        if !agent.handoffs().is_empty() {
            println!("    handoffs: {}", agent.handoffs().join(", "));
        }
    }

    let warnings = team.drain_warnings();
    for (agent, warning) in &warnings {
        println!("warning [{agent}]: {warning}");
    }
    shutdown(team).await;

    if warnings.is_empty() {
        println!("ok");
    } else {
        println!("ok with {} warning(s)", warnings.len());
    }
    Ok(())
}
