use actix_web::{web, HttpResponse};

use crate::context::AppContext;
use crate::error::AppError;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/{path:.*}").route(web::get().to(serve)));
}

async fn serve(ctx: web::Data<AppContext>, path: web::Path<String>) -> Result<HttpResponse, AppError> {
    let relative = path.into_inner();
    if ctx.media.resolve(&relative).is_none() {
        return Err(AppError::param_error("invalid media path"));
    }
    let data = ctx
        .media
        .read(&relative)
        .await
        .map_err(|_| AppError::fail("media not found"))?;
    // Content decides the type: a `.png` profile image holds JPEG bytes.
    let content_type = infer::get(&data)
        .map(|kind| kind.mime_type())
        .unwrap_or("application/octet-stream");
    Ok(HttpResponse::Ok().content_type(content_type).body(data))
}
