use std::collections::HashMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};

use anyhow::{
  Context,
  anyhow
};
use tracing::{
  debug,
  info,
  trace,
  warn
};

use crate::holiday::Region;
use crate::summary::DEFAULT_VACATION_QUOTA;

#[derive(Debug, Clone)]
pub struct Config {
  map: HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Config {
  #[tracing::instrument(skip(
    rc_override
  ))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Config {
      map:          HashMap::new(),
      loaded_files: vec![]
    };

    cfg.map.insert(
      "data.location".to_string(),
      "~/.portis".to_string()
    );
    cfg.map.insert(
      "vacation.quota".to_string(),
      DEFAULT_VACATION_QUOTA.to_string()
    );
    cfg.map.insert(
      "color".to_string(),
      "on".to_string()
    );

    let rc_file =
      resolve_rc_path(rc_override)?;
    if let Some(path) = rc_file {
      info!(portisrc = %path.display(), "loading portisrc");
      cfg.load_file(&path)?;
    } else {
      debug!(
        "no portisrc found; using \
         defaults"
      );
    }

    Ok(cfg)
  }

  /// Builds a config from rc-file text
  /// without touching the filesystem.
  /// `include` lines are not allowed.
  pub fn from_rc_str(
    text: &str
  ) -> anyhow::Result<Self> {
    let mut cfg = Config {
      map:          HashMap::new(),
      loaded_files: vec![]
    };
    for (line_num, raw_line) in
      text.lines().enumerate()
    {
      let Some(line) =
        strip_comment(raw_line)
      else {
        continue;
      };
      if line.starts_with("include ") {
        return Err(anyhow!(
          "include is not supported \
           here (line {})",
          line_num + 1
        ));
      }
      let (key, value) = split_key_value(
        line
      )
      .ok_or_else(|| {
        anyhow!(
          "invalid config line {}: {}",
          line_num + 1,
          raw_line
        )
      })?;
      cfg.map.insert(key, value);
    }
    Ok(cfg)
  }

  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .to_string();
      debug!(key = %key, value = %v, "applying override");
      self.map.insert(key, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.map.get(key).cloned()
  }

  pub fn get_bool(
    &self,
    key: &str
  ) -> Option<bool> {
    self
      .map
      .get(key)
      .map(|v| parse_bool(v))
  }

  pub fn get_i64(
    &self,
    key: &str
  ) -> anyhow::Result<Option<i64>> {
    self
      .map
      .get(key)
      .map(|raw| {
        raw.trim().parse::<i64>().with_context(
          || {
            format!(
              "config key {key} is not \
               an integer: {raw}"
            )
          }
        )
      })
      .transpose()
  }

  /// Region set in the rc file, if any.
  /// Wins over the stored preference.
  pub fn region(
    &self
  ) -> anyhow::Result<Option<Region>> {
    self
      .get("calendar.region")
      .filter(|raw| !raw.trim().is_empty())
      .map(|raw| {
        raw.parse::<Region>().with_context(
          || {
            "invalid calendar.region \
             setting"
          }
        )
      })
      .transpose()
  }

  pub fn vacation_quota(
    &self
  ) -> anyhow::Result<i64> {
    Ok(
      self
        .get_i64("vacation.quota")?
        .unwrap_or(
          DEFAULT_VACATION_QUOTA
        )
    )
  }

  pub fn iter(
    &self
  ) -> impl Iterator<Item = (&String, &String)>
  {
    self.map.iter()
  }

  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;

    self
      .loaded_files
      .push(path.clone());

    let base_dir = path
      .parent()
      .map(|p| p.to_path_buf())
      .unwrap_or_else(|| {
        PathBuf::from(".")
      });

    for (line_num, raw_line) in
      text.lines().enumerate()
    {
      let Some(line) =
        strip_comment(raw_line)
      else {
        continue;
      };

      if let Some(include_rest) =
        line.strip_prefix("include ")
      {
        let include_path =
          resolve_include_path(
            &base_dir,
            include_rest.trim()
          )?;
        debug!(
            file = %path.display(),
            include = %include_path.display(),
            line = line_num + 1,
            "processing include"
        );

        if include_path.exists() {
          self
            .load_file(&include_path)?;
        } else {
          warn!(include = %include_path.display(), "include file does not exist; skipping");
        }
        continue;
      }

      let (key, value) =
        split_key_value(line)
          .ok_or_else(|| {
            anyhow!(
              "invalid config line \
               {}:{}: {}",
              path.display(),
              line_num + 1,
              raw_line
            )
          })?;

      trace!(key = %key, value = %value, "loaded config key");
      self.map.insert(key, value);
    }

    Ok(())
  }
}

#[tracing::instrument(skip(
  cfg,
  override_dir
))]
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = if let Some(path) =
    override_dir
  {
    path.to_path_buf()
  } else if let Some(cfg_value) = cfg
    .get("data.location")
    .filter(|v| !v.trim().is_empty())
  {
    expand_tilde(Path::new(&cfg_value))
  } else {
    default_data_dir()?
  };

  if !dir.exists() {
    info!(dir = %dir.display(), "creating data directory");
    fs::create_dir_all(&dir)
      .with_context(|| {
        format!(
          "failed to create {}",
          dir.display()
        )
      })?;
  }

  Ok(dir)
}

#[tracing::instrument(skip(
  override_path
))]
fn resolve_rc_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(rc_env) =
    std::env::var("PORTISRC")
  {
    if rc_env == "/dev/null" {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(
      rc_env
    )));
  }

  let home = dirs::home_dir()
    .ok_or_else(|| {
      anyhow!(
        "cannot determine home \
         directory"
      )
    })?;
  let candidate = home.join(".portisrc");
  if candidate.exists() {
    return Ok(Some(candidate));
  }

  Ok(None)
}

fn default_data_dir()
-> anyhow::Result<PathBuf> {
  let home = dirs::home_dir()
    .ok_or_else(|| {
      anyhow!(
        "cannot determine home \
         directory"
      )
    })?;
  Ok(home.join(".portis"))
}

fn resolve_include_path(
  base_dir: &Path,
  include: &str
) -> anyhow::Result<PathBuf> {
  if include.trim().is_empty() {
    return Err(anyhow!(
      "include path cannot be empty"
    ));
  }

  let raw = PathBuf::from(include);
  let expanded = expand_tilde(&raw);
  if expanded.is_absolute() {
    Ok(expanded)
  } else {
    Ok(base_dir.join(expanded))
  }
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

fn strip_comment(
  raw_line: &str
) -> Option<&str> {
  let line = raw_line
    .split_once('#')
    .map_or(raw_line, |(before, _)| {
      before
    })
    .trim();
  (!line.is_empty()).then_some(line)
}

fn split_key_value(
  line: &str
) -> Option<(String, String)> {
  let (k, v) = line.split_once('=')?;
  let key = k.trim();
  if key.is_empty() {
    return None;
  }
  Some((
    key.to_string(),
    v.trim().to_string()
  ))
}

fn parse_bool(s: &str) -> bool {
  matches!(
    s.trim()
      .to_ascii_lowercase()
      .as_str(),
    "1" | "y" | "yes" | "on" | "true"
  )
}
