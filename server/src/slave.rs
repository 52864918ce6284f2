use std::path::PathBuf;
use std::time::Duration;

use structopt::StructOpt;

#[derive(StructOpt)]
#[structopt(name = "kvstore-slave")]
struct Opt {
    /// Unique slave ID
    #[structopt(short = "i", long = "id")]
    id: u64,

    /// Participant log file
    #[structopt(short = "l", long = "log", parse(from_os_str))]
    log: PathBuf,

    /// Hostname to listen on and advertise to the master
    #[structopt(long = "host", default_value = "localhost")]
    host: String,

    /// Port to listen on (0 for any)
    #[structopt(short = "p", long = "port", default_value = "0")]
    port: u16,

    /// Master hostname
    #[structopt(short = "m", long = "master", default_value = "localhost")]
    master: String,

    /// Master registration port
    #[structopt(short = "r", long = "registration-port", default_value = "9090")]
    registration_port: u16,

    /// Worker threads
    #[structopt(short = "w", long = "workers", default_value = "4")]
    workers: usize,

    /// Socket timeout (in milliseconds)
    #[structopt(short = "t", long = "timeout", default_value = "3000")]
    timeout: u64,

    /// Delay between registration attempts (in milliseconds)
    #[structopt(long = "retry", default_value = "1000")]
    retry: u64,

    /// Log verbosity (repeat for more)
    #[structopt(short = "v", long = "verbose", parse(from_occurrences))]
    verbose: u8,
}

fn main() {
    let opt = Opt::from_args();

    kvstore_server::init_logging(opt.verbose)
        .expect("[INTERNAL ERROR]: failed to initialize logger");

    let slave = kvstore::SlaveConfig::new(opt.id, opt.log)
        .with_host(opt.host)
        .with_port(opt.port)
        .with_master(opt.master, opt.registration_port)
        .with_workers(opt.workers)
        .with_timeout(Duration::from_millis(opt.timeout))
        .run();

    let slave = match slave {
    | Ok(slave) => slave,
    | Err(error) => {
        log::error!("could not start slave {}: {}", opt.id, error);
        std::process::exit(1)
    }
    };

    // The master may not be up yet
    while let Err(error) = slave.register() {
        log::warn!("registration of {} failed: {}", slave.info(), error);
        std::thread::sleep(Duration::from_millis(opt.retry));
    }

    log::info!("slave {} serving on {}", slave.info(), slave.addr());

    loop {
        std::thread::park();
    }
}
