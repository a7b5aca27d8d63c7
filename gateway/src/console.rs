//
// Copyright 2025-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Operator console
//!
//! Reads commands from standard input and drives the server controller,
//! standing in for the start/stop menu of a desktop front-end.

use futures::StreamExt;
use nodelink_gateway::{ServerConfig, ServerController};
use tokio_util::codec::{FramedRead, LinesCodec};

/// Console commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Status,
    Sessions,
    Help,
    Quit,
    Unknown(String),
}

impl Command {
    /// Parse one input line; blank lines yield `None`
    pub fn parse(line: &str) -> Option<Self> {
        let word = line.split_whitespace().next()?;
        Some(match word.to_ascii_lowercase().as_str() {
            "start" => Command::Start,
            "stop" => Command::Stop,
            "status" => Command::Status,
            "sessions" | "who" => Command::Sessions,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            _ => Command::Unknown(word.to_string()),
        })
    }
}

/// Run the console until `quit`, end of input or Ctrl-C
pub async fn run(controller: &ServerController, config: &ServerConfig) {
    let mut lines = FramedRead::new(tokio::io::stdin(), LinesCodec::new());
    println!("Type 'help' for a list of commands");

    loop {
        let line = tokio::select! {
            line = lines.next() => line,
            _ = tokio::signal::ctrl_c() => break,
        };

        let line = match line {
            Some(Ok(line)) => line,
            Some(Err(e)) => {
                tracing::error!("Console input error: {}", e);
                break;
            }
            None => break,
        };

        let Some(command) = Command::parse(&line) else {
            continue;
        };
        if !execute(controller, config, command).await {
            break;
        }
    }
}

/// Execute a command; returns false when the console should exit
async fn execute(controller: &ServerController, config: &ServerConfig, command: Command) -> bool {
    match command {
        Command::Start => {
            if let Err(e) = controller.start(config.clone()).await {
                println!("{}", e);
            }
        }
        Command::Stop => {
            if let Err(e) = controller.stop().await {
                println!("{}", e);
            }
        }
        Command::Status => match controller.local_addr().await {
            Some(addr) => println!(
                "Server {} on {}, {} of {} nodes in use",
                controller.state(),
                addr,
                controller.session_count().await,
                config.max_sessions
            ),
            None => println!("Server {}", controller.state()),
        },
        Command::Sessions => {
            let sessions = controller.sessions().await;
            if sessions.is_empty() {
                println!("No callers online");
            }
            for session in sessions {
                println!("  {} ({}s)", session, session.connected_for());
            }
        }
        Command::Help => {
            println!("  start     start accepting callers");
            println!("  stop      disconnect everyone and stop listening");
            println!("  status    show server state and node usage");
            println!("  sessions  list callers online");
            println!("  quit      stop the server and exit");
        }
        Command::Quit => return false,
        Command::Unknown(word) => println!("Unknown command '{}', type 'help'", word),
    }
    true
}
