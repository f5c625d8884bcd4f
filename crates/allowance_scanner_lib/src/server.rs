use crate::runtime::AllowanceRuntime;
use crate::utils::{parse_address, parse_chain_ids};
use actix_web::web::Data;
use actix_web::{web, HttpRequest, Responder};
use serde::Deserialize;
use serde_json::json;
use std::str::FromStr;
use web3::types::Address;

pub struct ServerData {
    pub runtime: AllowanceRuntime,
}

macro_rules! return_on_error {
    ( $e:expr ) => {
        match $e {
            Ok(x) => x,
            Err(err) => {
                return web::Json(json!({
                    "error": err.to_string()
                }))
            },
        }
    }
}

fn path_address(req: &HttpRequest, name: &str) -> Result<Address, String> {
    let raw = req
        .match_info()
        .get(name)
        .ok_or_else(|| format!("missing {}", name))?;
    parse_address(raw).map_err(|e| e.to_string())
}

fn path_chain_id(req: &HttpRequest) -> Result<u64, String> {
    req.match_info()
        .get("chain_id")
        .and_then(|chain_id| u64::from_str(chain_id).ok())
        .ok_or_else(|| "failed to parse chain_id".to_string())
}

#[derive(Debug, Deserialize)]
pub struct ScanQuery {
    pub chains: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowancesQuery {
    #[serde(default)]
    pub risk_only: bool,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn scan_start(
    data: Data<Box<ServerData>>,
    req: HttpRequest,
    query: web::Query<ScanQuery>,
) -> impl Responder {
    let wallet = return_on_error!(path_address(&req, "id"));
    let chain_ids = match &query.chains {
        Some(chains) => Some(return_on_error!(parse_chain_ids(chains))),
        None => None,
    };
    let job_id = data.runtime.spawn_scan(wallet, chain_ids).await;
    web::Json(json!({
        "jobId": job_id,
    }))
}

pub async fn scan_status(data: Data<Box<ServerData>>, req: HttpRequest) -> impl Responder {
    let job_id = req.match_info().get("id").unwrap_or_default();
    match data.runtime.get_job(job_id).await {
        Some(job) => web::Json(json!({
            "job": job,
        })),
        None => web::Json(json!({
            "error": format!("scan job {} not found", job_id)
        })),
    }
}

pub async fn allowances(
    data: Data<Box<ServerData>>,
    req: HttpRequest,
    query: web::Query<AllowancesQuery>,
) -> impl Responder {
    let wallet = return_on_error!(path_address(&req, "wallet"));
    let (rows, total) = return_on_error!(
        data.runtime
            .list_allowances(wallet, query.risk_only, query.limit, query.offset)
            .await
    );
    let rows = rows
        .iter()
        .map(|row| {
            let mut value = json!(row);
            value["riskFlags"] = json!(row.risk_flag_list());
            value
        })
        .collect::<Vec<_>>();

    web::Json(json!({
        "allowances": rows,
        "total": total,
    }))
}

pub async fn refresh_risk(data: Data<Box<ServerData>>, req: HttpRequest) -> impl Responder {
    let wallet = return_on_error!(path_address(&req, "wallet"));
    let report = return_on_error!(data.runtime.refresh_risk(wallet).await);
    web::Json(json!({
        "report": report,
    }))
}

pub async fn coverage(data: Data<Box<ServerData>>, req: HttpRequest) -> impl Responder {
    let wallet = return_on_error!(path_address(&req, "wallet"));
    let coverage = return_on_error!(data.runtime.coverage(wallet).await);
    web::Json(json!({
        "coverage": coverage,
    }))
}

pub async fn token(data: Data<Box<ServerData>>, req: HttpRequest) -> impl Responder {
    let chain_id = return_on_error!(path_chain_id(&req));
    let address = return_on_error!(path_address(&req, "address"));
    let token = return_on_error!(data.runtime.token_metadata(chain_id, address).await);
    web::Json(json!({
        "token": token,
    }))
}

pub async fn spender(data: Data<Box<ServerData>>, req: HttpRequest) -> impl Responder {
    let chain_id = return_on_error!(path_chain_id(&req));
    let address = return_on_error!(path_address(&req, "address"));
    let label = return_on_error!(data.runtime.spender_info(chain_id, address).await);
    let explorer_url = data
        .runtime
        .setup
        .get_chain_setup(chain_id)
        .ok()
        .and_then(|chain| chain.explorer_address_url(&format!("{:#x}", address)));
    web::Json(json!({
        "spender": label,
        "explorerUrl": explorer_url,
    }))
}

pub async fn chains(data: Data<Box<ServerData>>) -> impl Responder {
    let chains = data
        .runtime
        .setup
        .chain_setup
        .values()
        .map(|chain| {
            json!({
                "chainId": chain.chain_id,
                "name": chain.name,
                "enabled": chain.enabled,
                "staleThresholdBlocks": chain.stale_threshold_blocks,
                "endpointCount": chain.endpoints.len(),
            })
        })
        .collect::<Vec<_>>();
    web::Json(json!({
        "chains": chains,
        "endpoints": data.runtime.provider.endpoint_status(),
    }))
}

/// `POST /scan/{id}` takes a wallet, `GET /scan/{id}` a job id.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/scan/{id}")
            .route(web::post().to(scan_start))
            .route(web::get().to(scan_status)),
    )
    .route("/allowances/{wallet}", web::get().to(allowances))
    .route("/risk/{wallet}", web::post().to(refresh_risk))
    .route("/coverage/{wallet}", web::get().to(coverage))
    .route("/token/{chain_id}/{address}", web::get().to(token))
    .route("/spender/{chain_id}/{address}", web::get().to(spender))
    .route("/chains", web::get().to(chains));
}
