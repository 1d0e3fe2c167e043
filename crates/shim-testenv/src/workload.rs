//! Sample workloads and the runtime shims they exercise.
//!
//! A workload pairs a runtime with an image. The runtime names the shim
//! binary; the image names the build context, tag and exported archive. Most
//! workloads use an image named after their runtime. Others share a shim
//! with a differently named image, written `runtime:image` (for example
//! `spin:spin-keyvalue`).

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// A sample workload paired with one containerd shim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workload {
    runtime: String,
    image: String,
}

impl Workload {
    /// Workload whose image is named after its runtime.
    pub fn new(runtime: impl Into<String>) -> Self {
        let runtime = runtime.into();
        Self {
            image: runtime.clone(),
            runtime,
        }
    }

    pub fn with_image(runtime: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            runtime: runtime.into(),
            image: image.into(),
        }
    }

    pub fn runtime(&self) -> &str {
        &self.runtime
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    /// Shim binary name, e.g. `containerd-shim-spin-v1`.
    ///
    /// The shim's cargo manifest lives in a directory of the same name.
    pub fn shim_name(&self) -> String {
        format!("containerd-shim-{}-v1", self.runtime)
    }

    /// Release binary produced by `cross build` for `target`, relative to the
    /// repository root.
    pub fn shim_build_output(&self, target: &str) -> PathBuf {
        let shim = self.shim_name();
        PathBuf::from(&shim)
            .join("target")
            .join(target)
            .join("release")
            .join(shim)
    }

    /// Cargo manifest of the shim crate, relative to the repository root.
    pub fn shim_manifest(&self) -> PathBuf {
        PathBuf::from(self.shim_name()).join("Cargo.toml")
    }

    /// Local image tag, e.g. `spin-hello-world:latest`.
    pub fn image_tag(&self) -> String {
        format!("{}-hello-world:latest", self.image)
    }

    /// Image build context. Written with a leading `./` to match how the
    /// build is invoked by hand.
    pub fn build_context(&self) -> String {
        format!("./images/{}", self.image)
    }

    /// Directory holding the exported image archive.
    pub fn output_dir(&self) -> PathBuf {
        PathBuf::from("test").join(format!("out_{}", self.image))
    }

    /// Exported image archive.
    pub fn archive_path(&self) -> PathBuf {
        self.output_dir().join("img.tar")
    }
}

impl fmt::Display for Workload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.runtime == self.image {
            f.write_str(&self.runtime)
        } else {
            write!(f, "{}:{}", self.runtime, self.image)
        }
    }
}

impl FromStr for Workload {
    type Err = String;

    /// Parse `runtime` or `runtime:image`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            None => Ok(Self::new(s)),
            Some((runtime, image)) if !runtime.is_empty() && !image.is_empty() => {
                Ok(Self::with_image(runtime, image))
            }
            Some(_) => Err(format!("expected RUNTIME or RUNTIME:IMAGE, got '{s}'")),
        }
    }
}
