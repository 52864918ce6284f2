use std::io::{BufRead, BufReader, Write};
use std::time::Duration;

use structopt::StructOpt;

enum Command {
    /// Store a value under a key
    Put {
        key: String,
        value: String,
    },

    /// Look up the value of a key
    Get {
        key: String,
    },

    /// Remove a key
    Del {
        key: String,
    },

    Help,

    Quit,
}

fn usage() {
    println!(
        "{}{}{}{}{}{}{}",
        "--------------------------------------------------------------\n",
        "Possible commands:\n",
        "put <KEY> <VALUE> | p <KEY> <VALUE>  -- Store <VALUE> at <KEY>\n",
        "get <KEY>         | g <KEY>          -- Look up <KEY>\n",
        "del <KEY>         | d <KEY>          -- Remove <KEY>\n",
        "quit              | q                -- Exit\n",
        "--------------------------------------------------------------",
    );
}

impl std::str::FromStr for Command {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut iter = s.trim().splitn(3, ' ');
        let command = iter.next();
        let key = iter.next().map(str::to_string);
        let value = iter.next().map(str::to_string);
        match (command, key, value) {
        | (Some("help"), _, _) | (Some("h"), _, _) => Ok(Command::Help),
        | (Some("quit"), _, _) | (Some("q"), _, _) => Ok(Command::Quit),
        | (Some("put"), Some(key), Some(value))
        | (Some("p"), Some(key), Some(value)) => Ok(Command::Put { key, value }),
        | (Some("get"), Some(key), None)
        | (Some("g"), Some(key), None) => Ok(Command::Get { key }),
        | (Some("del"), Some(key), None)
        | (Some("d"), Some(key), None) => Ok(Command::Del { key }),
        | _ => Err(()),
        }
    }
}

fn run(client: kvstore::KvClient) {
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    let mut lines = BufReader::new(stdin.lock())
        .lines()
        .filter_map(|line| line.ok());

    // Main interaction loop
    loop {
        print!("> ");
        stdout.flush().ok();

        let line = match lines.next() {
        | Some(line) => line,
        | None => return,
        };

        if line.trim().is_empty() { continue }

        // Attempt to parse command from user input
        let command = match line.parse::<Command>() {
        | Ok(command) => command,
        | Err(()) => {
            println!("[ERROR]: could not parse command");
            continue
        }
        };

        match command {
        | Command::Put { key, value } => match client.put(&key, &value) {
            | Ok(()) => println!("[RESPONSE]: stored {}", key),
            | Err(error) => println!("[ERROR]: {}", error),
        },
        | Command::Get { key } => match client.get(&key) {
            | Ok(value) => println!("[RESPONSE]: {}", value),
            | Err(error) => println!("[ERROR]: {}", error),
        },
        | Command::Del { key } => match client.del(&key) {
            | Ok(()) => println!("[RESPONSE]: removed {}", key),
            | Err(error) => println!("[ERROR]: {}", error),
        },
        | Command::Help => usage(),
        | Command::Quit => return,
        }
    }
}

#[derive(StructOpt)]
#[structopt(name = "kvstore-client")]
struct Opt {
    /// Master hostname
    #[structopt(short = "m", long = "master", default_value = "localhost")]
    master: String,

    /// Master client port
    #[structopt(short = "p", long = "port", default_value = "8080")]
    port: u16,

    /// Request timeout (in milliseconds), none by default
    #[structopt(short = "t", long = "timeout")]
    timeout: Option<u64>,

    /// Log verbosity (repeat for more)
    #[structopt(short = "v", long = "verbose", parse(from_occurrences))]
    verbose: u8,
}

fn main() {
    let opt = Opt::from_args();

    kvstore_server::init_logging(opt.verbose)
        .expect("[INTERNAL ERROR]: failed to initialize logger");

    let client = match kvstore::KvClient::new(&opt.master, opt.port) {
    | Ok(client) => client.with_timeout(opt.timeout.map(Duration::from_millis)),
    | Err(error) => {
        println!("[ERROR]: {}", error);
        std::process::exit(1)
    }
    };

    usage();
    run(client);
}
