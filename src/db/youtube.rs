pub mod channel_stats_archive;
pub mod lib_googleapi;
