//! Config loader (ambient stack, spec §6; SPEC_FULL.md section C).
//!
//! Parses the `renderd.conf` INI format with the `ini` crate. Section
//! layout mirrors `ConfigParser`-based `read_styles`/`display_config` in
//! `original_source/renderd.py`: a `[renderd]` section, an opaque
//! `[mapnik]` section, and one section per style.

use std::collections::HashMap;
use std::path::Path;

use ini::Ini;

use crate::error::{RenderdError, RenderdResult};
use crate::scheduler::{DEFAULT_DIRTY_LIMIT, DEFAULT_REQUEST_LIMIT};

pub const DEFAULT_CFG_PATH: &str = "/etc/renderd.conf";
pub const DEFAULT_SOCKETNAME: &str = "/tmp/osm-renderd";
pub const DEFAULT_NUM_THREADS: usize = 4;
pub const DEFAULT_TILE_DIR: &str = "/var/lib/mod_tile";

/// A style section: `xml` is opaque to the core (handed to whatever
/// `RenderEngine` factory the binary wires up); `uri` is logged only.
#[derive(Debug, Clone)]
pub struct StyleConfig {
    pub name: String,
    pub xml: String,
    pub uri: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RenderdConfig {
    pub socketname: String,
    pub num_threads: usize,
    pub tile_dir: String,
    pub request_limit: usize,
    pub dirty_limit: usize,
    pub mapnik: HashMap<String, String>,
    pub styles: Vec<StyleConfig>,
}

impl RenderdConfig {
    /// Load and parse `path`. Missing `[renderd]` keys fall back to the
    /// daemon's built-in defaults, matching the `default_cfg` StringIO
    /// the Python reference reads before the real file (spec §6).
    pub fn load(path: &Path) -> RenderdResult<Self> {
        let ini = Ini::load_from_file(path)
            .map_err(|e| RenderdError::Config(format!("cannot read {}: {e}", path.display())))?;

        let renderd = ini.section(Some("renderd"));
        let socketname = renderd
            .and_then(|s| s.get("socketname"))
            .unwrap_or(DEFAULT_SOCKETNAME)
            .to_string();
        let tile_dir = renderd
            .and_then(|s| s.get("tile_dir"))
            .unwrap_or(DEFAULT_TILE_DIR)
            .to_string();
        let num_threads = match renderd.and_then(|s| s.get("num_threads")) {
            Some(v) => v
                .parse()
                .map_err(|_| RenderdError::Config(format!("invalid num_threads: {v}")))?,
            None => DEFAULT_NUM_THREADS,
        };
        let request_limit = match renderd.and_then(|s| s.get("request_limit")) {
            Some(v) => v
                .parse()
                .map_err(|_| RenderdError::Config(format!("invalid request_limit: {v}")))?,
            None => DEFAULT_REQUEST_LIMIT,
        };
        let dirty_limit = match renderd.and_then(|s| s.get("dirty_limit")) {
            Some(v) => v
                .parse()
                .map_err(|_| RenderdError::Config(format!("invalid dirty_limit: {v}")))?,
            None => DEFAULT_DIRTY_LIMIT,
        };

        let mapnik = ini
            .section(Some("mapnik"))
            .map(|s| s.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
            .unwrap_or_default();

        let mut styles = Vec::new();
        for (section, props) in ini.iter() {
            let Some(name) = section else { continue };
            if name == "renderd" || name == "mapnik" {
                continue;
            }
            let xml = props
                .get("xml")
                .ok_or_else(|| RenderdError::Config(format!("style [{name}] missing xml=")))?
                .to_string();
            let uri = props.get("uri").map(|s| s.to_string());
            styles.push(StyleConfig { name: name.to_string(), xml, uri });
        }

        Ok(Self {
            socketname,
            num_threads,
            tile_dir,
            request_limit,
            dirty_limit,
            mapnik,
            styles,
        })
    }

    /// Print the resolved style table, mirroring `display_config` in
    /// `original_source/renderd.py`.
    pub fn log_styles(&self) {
        for style in &self.styles {
            match &style.uri {
                Some(uri) => eprintln!(
                    "[CONFIG] style {}: uri={} xml={}",
                    style.name, uri, style.xml
                ),
                None => eprintln!("[CONFIG] style {}: xml={}", style.name, style.xml),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_conf(contents: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn parses_renderd_section_and_defaults() {
        let f = write_conf(
            "[renderd]\nsocketname=/tmp/test-sock\nnum_threads=8\ntile_dir=/tmp/tiles\n",
        );
        let cfg = RenderdConfig::load(f.path()).unwrap();
        assert_eq!(cfg.socketname, "/tmp/test-sock");
        assert_eq!(cfg.num_threads, 8);
        assert_eq!(cfg.tile_dir, "/tmp/tiles");
        assert_eq!(cfg.request_limit, DEFAULT_REQUEST_LIMIT);
        assert_eq!(cfg.dirty_limit, DEFAULT_DIRTY_LIMIT);
    }

    #[test]
    fn parses_styles_and_mapnik_section() {
        let f = write_conf(
            "[renderd]\nsocketname=/tmp/s\n\n\
             [mapnik]\nplugins_dir=/usr/lib/mapnik/input\n\n\
             [default]\nxml=/etc/renderd/style.xml\nuri=/osm/\n\n\
             [alt]\nxml=/etc/renderd/alt.xml\n",
        );
        let cfg = RenderdConfig::load(f.path()).unwrap();
        assert_eq!(cfg.mapnik.get("plugins_dir").unwrap(), "/usr/lib/mapnik/input");
        assert_eq!(cfg.styles.len(), 2);
        let default = cfg.styles.iter().find(|s| s.name == "default").unwrap();
        assert_eq!(default.xml, "/etc/renderd/style.xml");
        assert_eq!(default.uri.as_deref(), Some("/osm/"));
        let alt = cfg.styles.iter().find(|s| s.name == "alt").unwrap();
        assert!(alt.uri.is_none());
    }

    #[test]
    fn style_without_xml_is_an_error() {
        let f = write_conf("[renderd]\nsocketname=/tmp/s\n\n[broken]\nuri=/x/\n");
        assert!(RenderdConfig::load(f.path()).is_err());
    }
}
