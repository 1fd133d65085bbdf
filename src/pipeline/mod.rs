pub mod scorecard;
pub mod diagnostic; // Debug artifact dump (dump_dir / SCORECARD_DUMP_DIR)
