//! Board commands: `cards boards`, `cards show`, `cards move-column`,
//! `cards move-card`.

use anyhow::{Context, Result};

use hardcore_cards::board::{Board, BoardEngine, DragEndEvent, DragOutcome};
use hardcore_cards::client::CardsClient;
use hardcore_cards::config::CardsConfig;

pub async fn cmd_boards(config: &CardsConfig) -> Result<()> {
    let client = CardsClient::from_config(config)?;
    let boards = client.boards().list_boards().await.into_result()?;

    if boards.is_empty() {
        println!("No boards yet.");
        return Ok(());
    }

    println!();
    for board in &boards {
        let star = if board.is_starred {
            console::style("★").yellow().to_string()
        } else {
            " ".to_string()
        };
        println!(
            "  {} {:>6}  {}",
            star,
            console::style(board.id).dim(),
            board.title
        );
    }
    println!();
    Ok(())
}

pub async fn cmd_show(config: &CardsConfig, board_id: i64) -> Result<()> {
    let engine = load_engine(config, board_id).await?;
    print_board(&current(&engine)?);
    Ok(())
}

pub async fn cmd_move_column(
    config: &CardsConfig,
    board_id: i64,
    from: usize,
    to: usize,
) -> Result<()> {
    let engine = load_engine(config, board_id).await?;
    let outcome = engine.on_drag_end(DragEndEvent::column(from, to)).await?;
    report(&engine, outcome)
}

pub async fn cmd_move_card(
    config: &CardsConfig,
    board_id: i64,
    (from_column, from_index): (i64, usize),
    (to_column, to_index): (i64, usize),
) -> Result<()> {
    let engine = load_engine(config, board_id).await?;
    let event = DragEndEvent::card(from_column, from_index, to_column, to_index);
    let outcome = engine.on_drag_end(event).await?;
    report(&engine, outcome)
}

async fn load_engine(config: &CardsConfig, board_id: i64) -> Result<BoardEngine> {
    let client = CardsClient::from_config(config)?;
    let engine = client.board_engine();
    engine
        .load(board_id)
        .await
        .into_result()
        .with_context(|| format!("Failed to load board {}", board_id))?;
    Ok(engine)
}

fn current(engine: &BoardEngine) -> Result<Board> {
    engine
        .current_state()
        .context("Board state missing after load")
}

fn report(engine: &BoardEngine, outcome: DragOutcome) -> Result<()> {
    match outcome {
        DragOutcome::NoChange => println!("Nothing to move."),
        DragOutcome::Committed => println!("{} Moved.", console::style("✓").green()),
        DragOutcome::Superseded => println!("Move superseded by a newer one."),
        DragOutcome::RolledBack(notice) => {
            println!(
                "{} {}",
                console::style("Move reverted:").red().bold(),
                notice.message
            );
        }
    }
    match engine.current_state() {
        Some(board) => print_board(&board),
        None => println!(
            "The board could not be reloaded. Run {} once the service is reachable.",
            console::style("cards show").bold()
        ),
    }
    Ok(())
}

fn print_board(board: &Board) {
    println!();
    println!(
        "{} {}",
        console::style(&board.title).bold().cyan(),
        console::style(format!("#{}", board.id)).dim()
    );
    for column in &board.columns {
        println!();
        println!(
            "  [{}] {} {}",
            column.position,
            console::style(&column.title).bold(),
            console::style(format!("(column {})", column.id)).dim()
        );
        if column.cards.is_empty() {
            println!("      {}", console::style("empty").dim());
        }
        for card in &column.cards {
            let label = if card.title.is_empty() {
                &card.content
            } else {
                &card.title
            };
            println!(
                "      {:>2}. {} {}",
                card.position,
                label,
                console::style(format!("(card {})", card.id)).dim()
            );
        }
    }
    println!();
}
