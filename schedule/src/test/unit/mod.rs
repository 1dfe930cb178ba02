mod matcher;
mod schedule_analysis;
