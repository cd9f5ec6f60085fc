mod board;
mod config;
mod engine;
mod error;
mod ledger;
mod tree;

use std::io::{Error, ErrorKind};
use std::sync::{Arc, Mutex};
use clap::Parser;
use log::{debug, info, error};
use tokio::net::{TcpListener, TcpStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio_tungstenite::tungstenite::protocol::Message;
use crate::board::{Board, Symbol};
use crate::config::GameConfig;
use crate::engine::Engine;
use crate::error::GameError;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(long, default_value = "localhost")]
    host: String,
    #[arg(long, default_value_t = 999)]
    port: u16,
    #[arg(long, default_value = "info")]
    log_level: log::Level,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();
    simple_logger::init_with_level(args.log_level).map_err(|e| Error::new(ErrorKind::Other, e))?;

    let address = format!("{}:{}", args.host, args.port);
    let listener = TcpListener::bind(&address).await?;
    info!("Listening on: {}", address);

    while let Ok((stream, _)) = listener.accept().await {
        tokio::spawn(async move {
            if let Err(e) = accept_connection(stream).await {
                error!("Connection failed: {}", e);
            }
        });
    }

    Ok(())
}

struct Game {
    started: bool,
    over: bool,
    config: GameConfig,
    board: Board,
    engine: Option<Engine>,
}

impl Game {
    fn new() -> Self {
        Self {
            started: false,
            over: false,
            config: GameConfig::default(),
            board: Board::default(),
            engine: None,
        }
    }
}

async fn accept_connection(stream: TcpStream) -> Result<(), Error> {
    let addr = stream.peer_addr()?;
    info!("Peer address: {}", addr);

    let ws_stream = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|e| Error::new(ErrorKind::ConnectionAborted, e))?;
    info!("New WebSocket connection: {}", addr);

    let (mut write, mut read) = ws_stream.split();

    let game_mutex = Arc::new(Mutex::new(Game::new()));

    while let Some(raw_message) = read.next().await {
        match raw_message {
            Ok(text_message) => {
                if !text_message.is_text() && !text_message.is_binary() { continue; }
                match serde_json::from_slice::<Value>(&text_message.into_data()) {
                    Ok(data) => {
                        info!("Received: {}", data);
                        let result: Result<Value, Error> = handle_message(&game_mutex, data).await;
                        let response = match result {
                            Ok(resp) => resp,
                            Err(e) => {
                                error!("Error handling message: {}", e);
                                json!({"error": e.to_string()})
                            }
                        };
                        let response_str = response.to_string();
                        write.send(Message::text(response_str.clone())).await
                            .map_err(|e| Error::new(ErrorKind::BrokenPipe, e))?;
                        info!("Sent: {}", response_str);
                    },
                    Err(e) => { error!("Error parsing JSON: {:?}", e); }
                }
            }
            Err(e) => { error!("Error reading websocket message: {:?}", e); }
        }
    }

    info!("Connection closed: {}", addr);
    Ok(())
}

async fn handle_message(game_mutex: &Arc<Mutex<Game>>, data: Value) -> Result<Value, Error> {
    let mut game = game_mutex.lock()
        .map_err(|_| Error::new(ErrorKind::Other, "Game state is poisoned"))?;

    let map = data.as_object()
        .ok_or_else(|| Error::new(ErrorKind::InvalidInput, "Expected a dict"))?;

    // client message protocol: "start", "move"
    // server message protocol: "move", "board", "legal_moves", "error", "end"
    if map.contains_key("start") {
        let config: GameConfig = serde_json::from_value(data["start"].clone())?;
        handle_start(&mut game, config)
    } else if map.contains_key("move") {
        if !game.started {
            return Err(GameError::GameNotStarted.into());
        }
        let column = data["move"].as_u64().ok_or_else(
            || Error::new(ErrorKind::InvalidInput, "Expected integer field: move")
        )?;
        handle_move(&mut game, column as usize)
    } else {
        Err(Error::new(ErrorKind::InvalidInput, format!("Invalid message: {}", data)))
    }
}

fn handle_start(game: &mut Game, config: GameConfig) -> Result<Value, Error> {
    config.validate()?;
    let board = config.new_board()?;
    game.engine = config.versus_bot.then(|| Engine::new(&board, config.bot()));
    game.board = board;
    game.config = config;
    game.started = true;
    game.over = false;
    info!(
        "Started {}x{} game, run length {}, player {}",
        game.config.rows, game.config.cols, game.config.run_length, game.config.player
    );

    if game.engine.is_some() && game.board.turn() == game.config.bot() {
        make_engine_move(game)
    } else {
        Ok(position(game))
    }
}

fn handle_move(game: &mut Game, column: usize) -> Result<Value, Error> {
    if game.over {
        return Err(GameError::GameOver.into());
    }
    if column == 0 {
        let winner = game.board.turn().opponent();
        info!("{} conceded", game.board.turn());
        game.over = true;
        return Ok(json!({ "end": end_state(game, Some(winner), "concession") }));
    }
    if column > game.board.cols() {
        return Err(GameError::InvalidColumn(column).into());
    }
    if game.board.is_col_full(column - 1) {
        return Err(GameError::ColumnFull(column).into());
    }

    if let Some(end) = play_column(game, column)? {
        return Ok(json!({ "end": end }));
    }
    if game.engine.is_some() {
        make_engine_move(game)
    } else {
        Ok(position(game))
    }
}

fn make_engine_move(game: &mut Game) -> Result<Value, Error> {
    let column = game.engine.as_mut()
        .and_then(|engine| engine.choose_move())
        .ok_or(GameError::GameOver)?;
    info!("Engine plays column {}", column);
    match play_column(game, column)? {
        Some(end) => Ok(json!({ "move": column, "end": end })),
        None => {
            let mut response = position(game);
            response["move"] = json!(column);
            Ok(response)
        }
    }
}

/// Drops a piece for the side to move and returns the end state if that
/// finished the game. `column` is 1-indexed.
fn play_column(game: &mut Game, column: usize) -> Result<Option<Value>, Error> {
    let mover = game.board.turn();
    let won = game.board.is_win(column - 1, mover);
    game.board = game.board.make_move(column - 1)?;
    debug!("{} played column {}:\n{}", mover, column, game.board);

    if won {
        info!("{} wins", mover);
        game.over = true;
        return Ok(Some(end_state(game, Some(mover), "win")));
    }
    if game.board.is_full() {
        info!("Board is full, draw");
        game.over = true;
        return Ok(Some(end_state(game, None, "draw")));
    }
    if let Some(engine) = game.engine.as_mut() {
        engine.advance_after_move(column)?;
    }
    Ok(None)
}

fn position(game: &Game) -> Value {
    json!({ "board": game.board, "legal_moves": legal_moves(&game.board) })
}

fn legal_moves(board: &Board) -> Vec<usize> {
    board.legal_columns().map(|col| col + 1).collect()
}

fn end_state(game: &Game, winner: Option<Symbol>, reason: &str) -> Value {
    json!({ "winner": winner, "reason": reason, "board": game.board })
}
