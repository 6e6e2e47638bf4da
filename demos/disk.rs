use std::convert::Infallible;

use serve_static::{ServeStatic, ServeStaticError, ServeStaticOptions};
use tower::ServiceExt;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let service = ServeStatic::with_options("demos", ServeStaticOptions::new().max_age("1h"))
        .on_complete(|req, res, path| {
            println!("{} {} -> {} ({})", req.method, req.uri, res.status, path.display());
        });

    // errors that didn't fall through are rendered as empty responses
    let service = tower::service_fn(move |req: hyper::Request<hyper::Body>| {
        let service = service.clone();
        async move {
            let res = service.oneshot(req).await;
            Ok::<_, Infallible>(res.unwrap_or_else(ServeStaticError::into_response))
        }
    });

    // Run our service using `hyper`
    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], 3000));
    hyper::Server::bind(&addr)
        .serve(tower::make::Shared::new(service))
        .await
        .expect("server error");
}
