mod options;

use actix_cors::Cors;
use actix_web::web::Data;
use actix_web::{App, HttpServer};
use allowance_scanner_lib::config::Config;
use allowance_scanner_lib::err_custom_create;
use allowance_scanner_lib::error::AllowanceError;
use allowance_scanner_lib::runtime::start_allowance_engine;
use allowance_scanner_lib::server::{configure_routes, ServerData};
use allowance_scanner_lib::setup::ScanSetup;
use serde_json::json;
use std::env;

use crate::options::{validated_cli, ValidatedCommand};

fn print_json(value: serde_json::Value) -> Result<(), AllowanceError> {
    let text = serde_json::to_string_pretty(&value)
        .map_err(|err| err_custom_create!("Failed to serialize output: {}", err))?;
    println!("{}", text);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), AllowanceError> {
    let dotenv_result = dotenv::dotenv();
    env_logger::init();
    if let Err(err) = dotenv_result {
        log::debug!("No .env file loaded: {}", err);
    }
    let cli = validated_cli()?;
    let config = Config::load(&cli.config)?;
    let mut setup = ScanSetup::new(&config)?;
    setup.apply_env_overrides()?;

    let db_filename = if cli.memory_db {
        None
    } else {
        Some(env::var("DB_SQLITE_FILENAME").unwrap_or_else(|_| "allowances.sqlite".to_string()))
    };
    let runtime = start_allowance_engine(setup, db_filename.as_deref()).await?;

    match cli.command {
        ValidatedCommand::Scan { wallet, chain_ids } => {
            let ctrl_c_runtime = runtime.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    log::warn!("Interrupted, stopping after the current window");
                    ctrl_c_runtime.shutdown();
                }
            });
            let results = runtime.scan(wallet, chain_ids).await;
            print_json(json!({ "results": results }))?;
        }
        ValidatedCommand::RefreshRisk { wallet } => {
            let report = runtime.refresh_risk(wallet).await?;
            print_json(json!({ "report": report }))?;
        }
        ValidatedCommand::List {
            wallet,
            risk_only,
            limit,
            offset,
        } => {
            let (rows, total) = runtime
                .list_allowances(wallet, risk_only, limit, offset)
                .await?;
            let rows = rows
                .iter()
                .map(|row| {
                    let mut value = json!(row);
                    value["riskFlags"] = json!(row.risk_flag_list());
                    value
                })
                .collect::<Vec<_>>();
            print_json(json!({ "allowances": rows, "total": total }))?;
        }
        ValidatedCommand::Token { chain_id, address } => {
            let token = runtime.token_metadata(chain_id, address).await?;
            print_json(json!({ "token": token }))?;
        }
        ValidatedCommand::Spender { chain_id, address } => {
            let spender = runtime.spender_info(chain_id, address).await?;
            print_json(json!({ "spender": spender }))?;
        }
        ValidatedCommand::Coverage { wallet } => {
            let coverage = runtime.coverage(wallet).await?;
            print_json(json!({ "coverage": coverage }))?;
        }
        ValidatedCommand::Server(server_options) => {
            let server_data = Data::new(Box::new(ServerData {
                runtime: runtime.clone(),
            }));
            log::info!(
                "Starting http server on {}:{}",
                server_options.http_addr,
                server_options.http_port
            );
            HttpServer::new(move || {
                let cors = Cors::permissive();
                App::new()
                    .wrap(cors)
                    .app_data(server_data.clone())
                    .configure(configure_routes)
            })
            .workers(2)
            .bind((server_options.http_addr.as_str(), server_options.http_port))?
            .run()
            .await?;
            runtime.shutdown();
        }
    }
    Ok(())
}
