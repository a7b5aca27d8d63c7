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

mod console;

use anyhow::Context;
use clap::Parser;
use nodelink_gateway::config::{Arguments, Configuration};
use nodelink_gateway::{EchoFactory, EventBus, ServerConfig, ServerController, ServerError};
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load arguments from the command line
    let arguments: Arguments = Parser::parse();

    // Initialize tracing/logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .with_ansi(true)
        .init();

    // Load environment variables from .env file if specified
    if let Some(ref env_file) = arguments.env_file {
        if std::path::Path::new(env_file).exists() {
            debug!("Loading environment variables from file: {}", env_file);
            dotenv::from_filename(env_file).ok();
        }
    } else {
        debug!("Loading environment variables from default file");
        dotenv::dotenv().ok();
    }

    // Load configuration from a file with environment variable substitution
    let config = if std::path::Path::new(&arguments.config_file).exists() {
        Configuration::load(&arguments.config_file)
            .with_context(|| format!("Unable to load {}", arguments.config_file))?
    } else {
        info!(
            "No configuration file at {}, using defaults",
            arguments.config_file
        );
        Configuration::default()
    };
    debug!("Configuration loaded: {:?}", config);

    let server_config = ServerConfig::from(&config.telnet);
    let events = EventBus::with_capacity(config.status_buffer);
    let handlers = Arc::new(EchoFactory::new(config.banner.clone()));
    let controller = ServerController::with_events(events, handlers);

    // Print every status line, like the log pane of an operator front-end
    let mut status = controller.subscribe();
    let printer = tokio::spawn(async move {
        while let Some(event) = status.recv().await {
            println!("{}", event);
        }
    });

    if arguments.no_console {
        controller.start(server_config.clone()).await?;
        tokio::signal::ctrl_c().await?;
    } else {
        if !arguments.manual_start {
            // A failed start is reported on the status stream; the console stays up
            let _ = controller.start(server_config.clone()).await;
        }
        console::run(&controller, &server_config).await;
    }

    match controller.stop().await {
        Ok(()) | Err(ServerError::NotRunning) => {}
        Err(e) => return Err(e.into()),
    }

    // Dropping the controller closes the event bus and ends the printer
    drop(controller);
    printer.await?;

    Ok(())
}
