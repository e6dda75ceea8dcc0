use std::path::PathBuf;

fn main() {
    match handle_cli_flags() {
        Ok(true) => return,
        Ok(false) => {}
        Err(err) => {
            eprintln!("error: {err:?}");
            std::process::exit(1);
        }
    }

    if let Err(err) = fotolenta::run() {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

fn handle_cli_flags() -> anyhow::Result<bool> {
    let mut saw_flag = false;
    let mut init_data: Option<String> = None;
    let mut user_id: Option<i64> = None;
    let mut config_file: Option<PathBuf> = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("fotolenta {}", fotolenta::VERSION);
                saw_flag = true;
            }
            "--help" | "-h" => {
                println!(
                    "fotolenta — Browse your Telegram photo feed from the terminal.\n\n  --version, -V             Show version and exit\n  --help,    -h             Show this help message\n  --save-init-data <data>   Store the Telegram init payload in the config file\n  --user-id <id>            Telegram user id to store alongside the payload\n  --config-file <path>      Config file to write (default: platform config dir)"
                );
                saw_flag = true;
            }
            "--save-init-data" => {
                let value = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--save-init-data requires a value"))?;
                init_data = Some(value);
            }
            "--user-id" => {
                let value = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--user-id requires a value"))?;
                user_id = Some(
                    value
                        .parse::<i64>()
                        .map_err(|_| anyhow::anyhow!("--user-id expects a number, got {value:?}"))?,
                );
            }
            "--config-file" => {
                let value = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--config-file requires a value"))?;
                config_file = Some(PathBuf::from(value));
            }
            _ => {}
        }
    }

    if let Some(init_data) = init_data {
        let path = fotolenta::config::save_credentials(config_file, &init_data, user_id)?;
        println!("Saved credentials to {}", path.display());
        saw_flag = true;
    }

    Ok(saw_flag)
}
