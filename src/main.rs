fn main() {
    #[cfg(feature = "cli")]
    chunkpatch::cli::run();

    #[cfg(not(feature = "cli"))]
    {
        eprintln!("chunkpatch: CLI not enabled. Rebuild with `--features cli`.");
        std::process::exit(1);
    }
}
