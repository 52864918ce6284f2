use std::time::Duration;

use structopt::StructOpt;

#[derive(StructOpt)]
#[structopt(name = "kvstore-master")]
struct Opt {
    /// Number of slaves to wait for before serving clients
    #[structopt(short = "n", long = "slaves", default_value = "2")]
    slaves: usize,

    /// Address to listen on
    #[structopt(long = "host", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on for client requests
    #[structopt(short = "p", long = "port", default_value = "8080")]
    port: u16,

    /// Port to listen on for slave registration
    #[structopt(short = "r", long = "registration-port", default_value = "9090")]
    registration_port: u16,

    /// Client worker threads
    #[structopt(short = "w", long = "workers", default_value = "4")]
    workers: usize,

    /// Timeout for slave requests (in milliseconds)
    #[structopt(short = "t", long = "timeout", default_value = "3000")]
    timeout: u64,

    /// Number of cache shards
    #[structopt(long = "shards", default_value = "100")]
    shards: usize,

    /// Entries per cache shard
    #[structopt(long = "capacity", default_value = "10")]
    capacity: usize,

    /// Log verbosity (repeat for more)
    #[structopt(short = "v", long = "verbose", parse(from_occurrences))]
    verbose: u8,
}

fn main() {
    let opt = Opt::from_args();

    kvstore_server::init_logging(opt.verbose)
        .expect("[INTERNAL ERROR]: failed to initialize logger");

    let master = kvstore::MasterConfig::new(opt.slaves)
        .with_host(opt.host)
        .with_client_port(opt.port)
        .with_registration_port(opt.registration_port)
        .with_workers(opt.workers)
        .with_timeout(Duration::from_millis(opt.timeout))
        .with_cache(opt.shards, opt.capacity)
        .run();

    let master = match master {
    | Ok(master) => master,
    | Err(error) => {
        log::error!("could not start master: {}", error);
        std::process::exit(1)
    }
    };

    log::info!(
        "serving clients on {} and registrations on {}",
        master.client_addr(),
        master.registration_addr(),
    );

    loop {
        std::thread::park();
    }
}
