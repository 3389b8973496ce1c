/// Git metadata captured at build time by the vergen build script.
///
/// Every field is optional: building outside a git checkout leaves them unset.
pub(crate) struct BuildInfo {
    pub commit_sha1: Option<&'static str>,
    pub branch: Option<&'static str>,
    git_dirty: Option<&'static str>,
}

impl BuildInfo {
    pub fn git_dirty(&self) -> bool {
        self.git_dirty == Some("true")
    }
}

pub(crate) const BUILD_INFO: BuildInfo = BuildInfo {
    commit_sha1: option_env!("VERGEN_GIT_SHA"),
    branch: option_env!("VERGEN_GIT_BRANCH"),
    git_dirty: option_env!("VERGEN_GIT_DIRTY"),
};
