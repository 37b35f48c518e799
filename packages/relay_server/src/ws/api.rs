use actix_web::{get, web, HttpResponse, Result};
use tokio::task::spawn_local;

use crate::auth::OriginAllowed;
use crate::ws::handler;
use crate::ws::server::RelayServerHandle;

#[get("/ws")]
pub async fn websocket(
    req: actix_web::HttpRequest,
    stream: web::Payload,
    relay_server: web::Data<RelayServerHandle>,
    _: OriginAllowed,
) -> Result<HttpResponse, actix_web::Error> {
    let (res, session, msg_stream) = actix_ws::handle(&req, stream)?;

    // spawn websocket handler (and don't await it) so that the response is returned immediately
    spawn_local(handler::relay_ws(
        (**relay_server).clone(),
        session,
        msg_stream,
    ));

    Ok(res)
}
