//
//  Sample application.
//
//  Listens on localhost:4918, plain http, no ssl.
//  Connect to http://localhost:4918/
//
//  With --auth, the basic-auth username becomes the principal
//  "/principals/<username>". Passwords are not checked.
//

use std::convert::Infallible;
use std::error::Error;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;
use futures_util::future::TryFutureExt;
use headers::{authorization::Basic, Authorization, HeaderMapExt};

use dav_engine::acl::{AclConfig, Ace, PRINCIPAL_ALL, PRIV_READ};
use dav_engine::{body::Body, DavHandler, FileSystem, LockSystem};

#[derive(Clone)]
struct Server {
    dh: DavHandler,
    auth: bool,
}

impl Server {
    fn new(cli: &Cli) -> Self {
        let fs = match &cli.dir {
            Some(dir) => FileSystem::local(dir, cli.public),
            None => FileSystem::Mem,
        };
        let mut acl = AclConfig::new().hide_nodes_from_listings(cli.hide);
        if cli.public {
            let mut default_acl = acl.default_acl.clone();
            default_acl.push(Ace::new(PRINCIPAL_ALL, PRIV_READ));
            acl = acl.default_acl(default_acl);
        }
        if let Some(admin) = &cli.admin {
            acl = acl.admin(format!("/principals/{admin}"));
        }

        let mut config = DavHandler::builder(fs)
            .acl(acl)
            .autoindex(cli.autoindex)
            .expose_version(true);
        config = match &cli.lockfile {
            Some(path) => config.locksystem(LockSystem::File(path.clone())),
            None => config.locksystem(LockSystem::Mem),
        };
        if !cli.auth {
            config = config.principal("/principals/anonymous");
        }

        Server {
            dh: config.build(),
            auth: cli.auth,
        }
    }

    async fn handle(
        &self,
        req: hyper::Request<hyper::Body>,
    ) -> Result<hyper::Response<Body>, Infallible> {
        if !self.auth {
            return Ok(self.dh.handle(req).await);
        }
        // we want the client to authenticate.
        match req.headers().typed_get::<Authorization<Basic>>() {
            Some(Authorization(basic)) => {
                let principal = format!("/principals/{}", basic.username());
                Ok(self.dh.handle_with(req, None, Some(principal)).await)
            }
            None => {
                // return a 401 reply.
                let mut response = hyper::Response::new(Body::from("please auth"));
                *response.status_mut() = hyper::StatusCode::UNAUTHORIZED;
                response.headers_mut().insert(
                    "WWW-Authenticate",
                    hyper::header::HeaderValue::from_static("Basic realm=\"dav-engine\""),
                );
                Ok(response)
            }
        }
    }
}

#[derive(Debug, clap::Parser)]
#[command(about, version)]
struct Cli {
    /// port to listen on
    #[arg(short, long, default_value = "4918")]
    port: u16,
    /// local directory to serve, the default is an ephemeral memory filesystem
    #[arg(short, long)]
    dir: Option<String>,
    /// files are world readable
    #[arg(long)]
    public: bool,
    /// keep locks in this file
    #[arg(short, long)]
    lockfile: Option<PathBuf>,
    /// require basic authentication
    #[arg(short, long)]
    auth: bool,
    /// user that bypasses access control
    #[arg(long)]
    admin: Option<String>,
    /// generate directory indexes
    #[arg(long)]
    autoindex: bool,
    /// leave unreadable nodes out of listings
    #[arg(long)]
    hide: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let name = cli.dir.clone().unwrap_or_else(|| "memory filesystem".to_string());

    let dav_server = Server::new(&cli);
    let make_service = hyper::service::make_service_fn(|_| {
        let dav_server = dav_server.clone();
        async move {
            let func = move |req| {
                let dav_server = dav_server.clone();
                async move { dav_server.handle(req).await }
            };
            Ok::<_, hyper::Error>(hyper::service::service_fn(func))
        }
    });

    let addr = format!("0.0.0.0:{}", cli.port);
    let addr = SocketAddr::from_str(&addr)?;

    let server = hyper::Server::try_bind(&addr)?
        .serve(make_service)
        .map_err(|e| eprintln!("server error: {}", e));

    println!("Serving {} on {}", name, cli.port);
    let _ = server.await;
    Ok(())
}
