use anyhow::Context;
use gtk::prelude::*;
use gtk::Application;
use std::path::PathBuf;
use std::sync::Arc;

use cadenza::config::Config;
use cadenza::subsonic::SubsonicClient;

mod ui;

use ui::MainWindow;

const APP_ID: &str = "io.github.cadenza";

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::load();
    let palette = config
        .theme
        .palette()
        .context("invalid theme colors in config")?;
    // optional audio file whose waveform is shown in the seek bar
    let waveform_file = std::env::args_os().nth(1).map(PathBuf::from);

    let client = Arc::new(SubsonicClient::new(config.server.clone()));
    if config.server.url.is_empty() {
        log::warn!(
            "no server configured, edit {} to browse albums",
            Config::config_path().display()
        );
    } else {
        let client = client.clone();
        std::thread::spawn(move || {
            if let Err(e) = client.ping() {
                log::warn!("server ping failed: {}", e);
            }
        });
    }

    let app = Application::builder().application_id(APP_ID).build();
    app.connect_activate(move |app| {
        let window = MainWindow::new(app, &config, palette, client.clone(), waveform_file.clone());
        window.show();
    });
    // argv is consumed above; GTK would reject the file argument
    app.run_with_args::<&str>(&[]);
    Ok(())
}
