//! Collaboration commands: `cards search`, `cards invitations`.

use anyhow::{Context, Result};

use hardcore_cards::board::{Invitation, InvitationState};
use hardcore_cards::client::CardsClient;
use hardcore_cards::config::CardsConfig;

use super::super::InvitationCommands;

pub async fn cmd_search(config: &CardsConfig, text: &str) -> Result<()> {
    let client = CardsClient::from_config(config)?;
    let hits = client
        .boards()
        .search(text)
        .await
        .into_result()
        .context("Search failed")?;

    if hits.is_empty() {
        println!("No matches for {:?}.", text);
        return Ok(());
    }
    println!();
    for hit in &hits {
        println!(
            "  {:>6}  {:<8} {}",
            console::style(hit.board_id).dim(),
            console::style(&hit.kind).cyan(),
            hit.content
        );
    }
    println!();
    Ok(())
}

pub async fn cmd_invitations(
    config: &CardsConfig,
    command: Option<InvitationCommands>,
) -> Result<()> {
    let client = CardsClient::from_config(config)?;
    let boards = client.boards();

    match command.unwrap_or(InvitationCommands::List) {
        InvitationCommands::List => {
            let invitations = boards.list_invitations().await.into_result()?;
            if invitations.is_empty() {
                println!("No invitations.");
            }
            for invitation in &invitations {
                print_invitation(invitation);
            }
        }
        InvitationCommands::Send { board, email } => {
            boards
                .send_invitation(board, &email)
                .await
                .into_result()
                .with_context(|| format!("Failed to invite {}", email))?;
            println!("{} Invited {} to board {}.", console::style("✓").green(), email, board);
        }
        InvitationCommands::Accept { id } => {
            boards.respond_to_invitation(id, true).await.into_result()?;
            println!("{} Invitation {} accepted.", console::style("✓").green(), id);
        }
        InvitationCommands::Decline { id } => {
            boards.respond_to_invitation(id, false).await.into_result()?;
            println!("Invitation {} declined.", id);
        }
    }
    Ok(())
}

fn print_invitation(invitation: &Invitation) {
    let state = match invitation.state {
        InvitationState::Pending => console::style("pending").yellow(),
        InvitationState::Accepted => console::style("accepted").green(),
        InvitationState::Declined => console::style("declined").dim(),
        InvitationState::Other(_) => console::style("unknown").dim(),
    };
    let from = invitation
        .send_user_info
        .as_ref()
        .map(|u| u.nickname.as_str())
        .unwrap_or("?");
    let sent = invitation
        .invitation_time
        .and_then(chrono::DateTime::from_timestamp_millis)
        .map(|t| t.format("%Y-%m-%d").to_string())
        .unwrap_or_default();
    println!(
        "  {:>6}  {:<8} {} from {} {}",
        console::style(invitation.invitation_id).dim(),
        state,
        invitation.kanban_title,
        from,
        console::style(sent).dim()
    );
}
