/// Locator for a loadable model artifact.
#[derive(Clone, Debug)]
pub enum ModelArtifact {
    OnnxPath(std::path::PathBuf),
}
