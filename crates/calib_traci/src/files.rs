//! Simulator input files: the run configuration and the detector definition.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

/// Paths produced by [`write_simulation_files`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationFiles {
    pub config: PathBuf,
    pub additional: PathBuf,
    /// Where the simulator writes the loop's aggregated measurements.
    pub detector_output: PathBuf,
}

/// Contents of `simulation_<postfix>.sumo.cfg`.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig<'a> {
    pub net_file: &'a Path,
    pub additional_file: &'a str,
    pub begin: i64,
    pub seed: u64,
}

impl SimulationConfig<'_> {
    pub fn render(&self) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<configuration xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xsi:noNamespaceSchemaLocation="http://sumo.dlr.de/xsd/sumoConfiguration.xsd">
    <input>
        <net-file value="{net}"/>
        <additional-files value="{additional}"/>
    </input>
    <processing>
        <default.speeddev value="0"/>
        <emergency-insert value="true"/>
        <random-depart-offset value="0"/>
    </processing>
    <time>
        <begin value="{begin}"/>
    </time>
    <random>
        <seed value="{seed}"/>
    </random>
    <report>
        <no-step-log value="true"/>
        <no-warnings value="true"/>
    </report>
</configuration>
"#,
            net = xml_escape(&self.net_file.display().to_string()),
            additional = xml_escape(self.additional_file),
            begin = self.begin,
            seed = self.seed,
        )
    }
}

/// `<additional>` file declaring one induction loop 1 m into `lane`.
pub fn induction_loop_definition(detector_id: &str, lane: &str, output_file: &str) -> String {
    format!(
        "<additional>\n<inductionLoop id=\"{}\" lane=\"{}\" pos=\"1\" period=\"1\" file=\"{}\"/>\n</additional>\n",
        xml_escape(detector_id),
        xml_escape(lane),
        xml_escape(output_file),
    )
}

/// Write the loop definition and the configuration referencing it into `dir`.
///
/// The configuration refers to the additional file by its bare name, so both
/// files must stay side by side.
pub fn write_simulation_files(
    dir: &Path,
    postfix: &str,
    detector_id: &str,
    lane: &str,
    net_file: &Path,
    begin: i64,
    seed: u64,
) -> io::Result<SimulationFiles> {
    fs::create_dir_all(dir)?;

    let detector_output_name = format!("inductionLoop_{postfix}.xml");
    let additional_name = format!("inductionLoop_{postfix}.add.xml");
    let additional = dir.join(&additional_name);
    fs::write(
        &additional,
        induction_loop_definition(detector_id, lane, &detector_output_name),
    )?;

    let config = dir.join(format!("simulation_{postfix}.sumo.cfg"));
    let net_file = absolute(net_file);
    let rendered = SimulationConfig {
        net_file: &net_file,
        additional_file: &additional_name,
        begin,
        seed,
    }
    .render();
    fs::write(&config, rendered)?;
    debug!(config = %config.display(), additional = %additional.display(), "wrote simulator files");

    Ok(SimulationFiles {
        config,
        additional,
        detector_output: dir.join(detector_output_name),
    })
}

/// Resolve a relative path against the working directory so the simulator
/// finds it regardless of where the configuration lives.
fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
