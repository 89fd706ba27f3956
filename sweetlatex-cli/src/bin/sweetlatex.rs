use sweetlatex_cli::pretty::*;
use sweetlatex_cli::*;

use log::{self, debug};
use serde_json::Value;
use std::io::Write;
use std::path::PathBuf;
use structopt::StructOpt;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

#[derive(StructOpt)]
#[structopt(rename_all = "kebab-case", about = "CLI client for the SweetLatex storefront API")]
struct Opt {
    /// Storefront origin; API calls go to <host>/api
    #[structopt(
        global = true,
        long = "--host",
        env = "SWEETLATEX_BASE_API_URL",
        default_value = "http://localhost:5000"
    )]
    host: String,

    /// Where the access token is kept between invocations
    #[structopt(
        parse(from_os_str),
        global = true,
        long = "--session-file",
        env = "SWEETLATEX_SESSION_FILE",
        default_value = "sweetlatex_session.json"
    )]
    session_file: PathBuf,

    /// Log more messages. Pass multiple times for ever more verbosity
    ///
    /// By default, it'll only report errors. Passing `-v` one time also prints
    /// warnings, `-vv` enables info logging, `-vvv` debug, and `-vvvv` trace.
    #[structopt(global = true, long, short = "v", parse(from_occurrences))]
    verbose: i8,

    #[structopt(long = "--shell-completions", hidden = true)]
    shell_completions: Option<structopt::clap::Shell>,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(StructOpt)]
struct PageOpt {
    #[structopt(long, default_value = "25")]
    limit: u64,

    #[structopt(long, default_value = "0")]
    offset: u64,
}

impl PageOpt {
    fn page(&self) -> Page {
        Page::new(self.limit, self.offset)
    }
}

/// Path and fields of a raw API call, eg: `get /products limit==5`
#[derive(StructOpt)]
struct RequestOpt {
    /// API path, relative to <host>/api
    path: String,

    /// query (key==value), JSON body (key=value) or file (key@path) fields
    fields: Vec<ArgField>,

    /// Send body fields as multipart/form-data instead of JSON
    #[structopt(long)]
    form: bool,
}

impl RequestOpt {
    fn request(&self, method: Method) -> Result<ApiRequest> {
        request_from_fields(method, &self.path, &self.fields, self.form)
    }
}

#[derive(StructOpt)]
enum Command {
    /// Summarize configuration, session, and connection to the API
    Status,

    /// Exchange username and password for an access token
    Login {
        #[structopt(long, short)]
        username: String,

        #[structopt(long, short, env = "SWEETLATEX_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Revoke the session and forget the local access token
    Logout,

    /// Show the logged-in user
    Me,

    /// Raw GET, eg: `get /products limit==5`
    Get {
        #[structopt(flatten)]
        req: RequestOpt,
    },

    /// Raw POST, eg: `post /users username=susan email=susan@example.com`
    Post {
        #[structopt(flatten)]
        req: RequestOpt,
    },

    /// Raw PUT; add `--form` for multipart uploads
    Put {
        #[structopt(flatten)]
        req: RequestOpt,
    },

    /// Raw DELETE
    Delete {
        #[structopt(flatten)]
        req: RequestOpt,
    },

    Products {
        #[structopt(flatten)]
        page: PageOpt,
    },

    /// Presale view of one product
    Sale { id: u64 },

    Carts {
        /// Only the logged-in user's cart
        #[structopt(long)]
        mine: bool,

        #[structopt(flatten)]
        page: PageOpt,
    },

    /// Add a product to the logged-in user's cart
    AddToCart { product_id: u64 },

    Users {
        #[structopt(flatten)]
        page: PageOpt,
    },

    Orders {
        #[structopt(flatten)]
        page: PageOpt,
    },

    Artists {
        #[structopt(flatten)]
        page: PageOpt,
    },

    /// Start checkout for the current cart
    Checkout,

    /// Print the full URL of a media file
    Media { name: String },

    /// Ask for a password reset email
    ResetRequest { email: String },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let opt = Opt::from_args();

    let log_level = match opt.verbose {
        std::i8::MIN..=-1 => "none",
        0 => "error",
        1 => "warn",
        2 => "info",
        3 => "debug",
        4..=std::i8::MAX => "trace",
    };
    // hyper logging is very verbose, so crank that down even if everything else is more verbose
    let log_filter = format!("{},hyper=error", log_level);
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_filter))
        .format_timestamp(None)
        .init();

    debug!("Args parsed, starting up");

    #[cfg(windows)]
    colored_json::enable_ansi_support();

    if let Some(shell) = opt.shell_completions {
        Opt::clap().gen_completions_to("sweetlatex", shell, &mut std::io::stdout());
        std::process::exit(0);
    }

    match run(opt) {
        Ok(true) => Ok(()),
        Ok(false) => std::process::exit(1),
        Err(err) => {
            // Be graceful about some errors
            if let Some(io_err) = err.root_cause().downcast_ref::<std::io::Error>() {
                if let std::io::ErrorKind::BrokenPipe = io_err.kind() {
                    // presumably due to something like writing to stdout and piped to `head -n10` and
                    // stdout was closed
                    debug!("got BrokenPipe error, assuming stdout closed as expected and exiting with success");
                    std::process::exit(0);
                }
            }
            let mut color_stderr = StandardStream::stderr(if atty::is(atty::Stream::Stderr) {
                ColorChoice::Auto
            } else {
                ColorChoice::Never
            });
            color_stderr.set_color(ColorSpec::new().set_fg(Some(Color::Red)).set_bold(true))?;
            eprintln!("Error: {:?}", err);
            color_stderr.set_color(&ColorSpec::new())?;
            std::process::exit(1);
        }
    }
}

/// Prints a paginated collection as a listing, falling back to raw JSON for anything else.
fn print_listing(resp: &ApiResponse) -> Result<bool> {
    if resp.ok {
        if let Ok(page) = resp.parse_body::<Paginated<Value>>() {
            pp_listing(&page)?;
            return Ok(true);
        }
    }
    pp_response(resp)?;
    Ok(resp.ok)
}

fn print_result(resp: &ApiResponse) -> Result<bool> {
    pp_response(resp)?;
    Ok(resp.ok)
}

/// Returns whether the command succeeded.
fn run(opt: Opt) -> Result<bool> {
    let config = ClientConfig::new(&opt.host);
    let client = ApiClient::new(config, FileTokenStore::new(&opt.session_file))?
        .with_error_observer(|resp| {
            if let Err(e) = pp_server_fault(resp) {
                log::warn!("could not report server fault: {e}");
            }
        });

    match opt.cmd {
        Command::Status => {
            println!("Configuration");
            println!("  SWEETLATEX_BASE_API_URL: {}", client.config().origin);
            println!("  API base: {}", client.config().api_base());
            println!("  session file: {}", opt.session_file.display());
            if client.is_authenticated() {
                println!("  access token: <configured>");
            } else {
                println!("  access token:");
            }
            let health = client.health();
            println!("Connection");
            println!("  GET /health: {}", health.status);
            if client.is_authenticated() {
                let me = client.me();
                println!("Session");
                match me.body_str("username") {
                    Some(username) if me.ok => println!("  logged in as: {username}"),
                    _ => println!("  not logged in (status {})", me.status),
                }
            }
            Ok(health.ok)
        }
        Command::Login { username, password } => {
            let outcome = client.login(&username, &password);
            match outcome {
                LoginOutcome::Ok => {
                    println!("logged in as {username}");
                    Ok(true)
                }
                LoginOutcome::Fail => {
                    eprintln!("invalid username or password");
                    Ok(false)
                }
                LoginOutcome::Error => {
                    eprintln!("login failed; see -vv output for details");
                    Ok(false)
                }
            }
        }
        Command::Logout => {
            client.logout()?;
            println!("logged out");
            Ok(true)
        }
        Command::Me => print_result(&client.me()),
        Command::Get { req } => print_result(&client.request(&req.request(Method::Get)?)),
        Command::Post { req } => print_result(&client.request(&req.request(Method::Post)?)),
        Command::Put { req } => print_result(&client.request(&req.request(Method::Put)?)),
        Command::Delete { req } => print_result(&client.request(&req.request(Method::Delete)?)),
        Command::Products { page } => print_listing(&client.products(page.page())),
        Command::Sale { id } => print_result(&client.sale(id)),
        Command::Carts { mine, page } => {
            if mine {
                print_listing(&client.my_carts(page.page()))
            } else {
                print_listing(&client.carts(page.page()))
            }
        }
        Command::AddToCart { product_id } => print_result(&client.add_to_cart(product_id)),
        Command::Users { page } => print_listing(&client.users(page.page())),
        Command::Orders { page } => print_listing(&client.orders(page.page())),
        Command::Artists { page } => print_listing(&client.artists(page.page())),
        Command::Checkout => {
            let resp = client.create_checkout_session();
            let url = resp
                .body_str("session_url")
                .or(resp.body_str("cancel_url"))
                .map(|s| s.to_string());
            match url {
                Some(url) => {
                    writeln!(&mut std::io::stdout(), "{url}")?;
                    Ok(resp.ok)
                }
                None => print_result(&resp),
            }
        }
        Command::Media { name } => {
            println!("{}", client.image_url(&name));
            Ok(true)
        }
        Command::ResetRequest { email } => {
            let resp = client.request_password_reset(&email);
            if resp.ok {
                println!("You will receive an email with instructions to reset your password.");
                Ok(true)
            } else {
                print_result(&resp)
            }
        }
    }
}

#[test]
fn test_opt_parse() {
    let opt = Opt::from_iter(&["sweetlatex", "--host", "http://shop.test", "products", "--limit", "5"]);
    assert_eq!(opt.host, "http://shop.test");
    match opt.cmd {
        Command::Products { page } => assert_eq!(page.page(), Page::new(5, 0)),
        _ => panic!("expected products command"),
    }

    let opt = Opt::from_iter(&["sweetlatex", "get", "/products", "limit==5"]);
    match opt.cmd {
        Command::Get { req } => {
            let req = req.request(Method::Get).unwrap();
            assert_eq!(req.method(), Method::Get);
            assert_eq!(req.path(), "/products");
            assert_eq!(
                req.query_params(),
                &[("limit".to_string(), "5".to_string())]
            );
            assert!(req.body().is_none());
        }
        _ => panic!("expected get command"),
    }

    let opt = Opt::from_iter(&["sweetlatex", "post", "/products", "title=Corset", "--form"]);
    match opt.cmd {
        Command::Post { req } => {
            assert_eq!(req.path, "/products");
            assert_eq!(
                req.fields,
                vec![ArgField::Body("title".to_string(), serde_json::json!("Corset"))]
            );
            assert!(req.form);
            let req = req.request(Method::Post).unwrap();
            assert_eq!(req.method(), Method::Post);
            assert_eq!(req.encoding(), BodyEncoding::Form);
        }
        _ => panic!("expected post command"),
    }

    let opt = Opt::from_iter(&["sweetlatex", "put", "/expire/3"]);
    assert!(matches!(opt.cmd, Command::Put { .. }));
    let opt = Opt::from_iter(&["sweetlatex", "delete", "/products/12"]);
    match opt.cmd {
        Command::Delete { req } => {
            assert_eq!(req.request(Method::Delete).unwrap().path(), "/products/12")
        }
        _ => panic!("expected delete command"),
    }
}

#[test]
fn test_default_host() {
    // only this test touches the variable
    std::env::remove_var("SWEETLATEX_BASE_API_URL");
    let opt = Opt::from_iter(&["sweetlatex", "status"]);
    assert_eq!(opt.host, "http://localhost:5000");
    assert_eq!(
        ClientConfig::new(&opt.host).api_base(),
        "http://localhost:5000/api"
    );
}
