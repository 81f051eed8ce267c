use crate::db::youtube::channel_stats_archive::ChannelStatsArchive;

pub struct ProdDb {}

impl ProdDb {
    pub fn youtube_channel_stats() -> ChannelStatsArchive {
        ChannelStatsArchive {
            base_dir: "/home/adrian/Downloads/Archive/Youtube/ChannelStats".to_string(),
            duckdb_path: "/home/adrian/Downloads/Archive/DuckDB/youtube/channel_stats.duckdb"
                .to_string(),
        }
    }
}
