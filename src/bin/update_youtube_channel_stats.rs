use std::{env, error::Error, path::Path};

use clap::Parser;
use jiff::Zoned;
use log::{error, info};
use tubestats::db::{prod_db::ProdDb, youtube::lib_googleapi::YoutubeClient};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Environment name, e.g., test, prod
    #[arg(short, long, default_value = "prod")]
    env: String,
}

/// Run this job once a day, after midnight
fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();

    dotenvy::from_path(Path::new(format!(".env/{}.env", args.env).as_str())).unwrap();

    let archive = ProdDb::youtube_channel_stats();
    let client = YoutubeClient::new(env::var("YOUTUBE_API_KEY")?);
    let today = Zoned::now().date();

    let ids = archive.channel_ids()?;
    info!("read {} channel ids", ids.len());

    match archive.download_stats(&client, &ids, today) {
        Ok(n) => info!("downloaded {} files", n),
        Err(e) => {
            error!("{}", e);
            return Err(e);
        }
    }

    match archive.update_duckdb(today) {
        Ok(n) => info!("{} rows were inserted", n),
        Err(e) => {
            error!("{}", e);
            return Err(e);
        }
    }

    Ok(())
}
