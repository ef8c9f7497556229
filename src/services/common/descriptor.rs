//! Descriptor normalization shared by all backends.
//!
//! Backends compare the descriptor carried by an OS event with descriptors of
//! devices already in a list. The OS does not always report the same spelling
//! twice: Windows symbolic links differ in case, prefix and interface class
//! suffix between enumeration and `WM_DEVICECHANGE`, endpoint IDs differ in
//! case, CoreAudio hands out numbers, and V4L2 events carry bare file names.

use std::{
    path::{Path, PathBuf},
    sync::OnceLock,
};

use regex::Regex;

static INTERFACE_CLASS_SUFFIX: OnceLock<Option<Regex>> = OnceLock::new();
static VIDEO_NODE_NAME: OnceLock<Option<Regex>> = OnceLock::new();

fn interface_class_suffix() -> Option<&'static Regex> {
    INTERFACE_CLASS_SUFFIX
        .get_or_init(|| {
            Regex::new(
                r"#\{[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\}.*$",
            )
            .ok()
        })
        .as_ref()
}

fn video_node_name() -> Option<&'static Regex> {
    VIDEO_NODE_NAME
        .get_or_init(|| Regex::new(r"^video[0-9]+$").ok())
        .as_ref()
}

/// Case-folds an identifier that the OS treats case-insensitively.
pub fn fold_case(id: &str) -> String {
    id.trim().to_lowercase()
}

/// Reduces a Windows device interface symbolic link to its instance part.
///
/// `\\?\USB#VID_046D&PID_0825&MI_00#6&2A8B1F5&0&0000#{65e8773d-...}\global`
/// becomes `\\?\usb#vid_046d&pid_0825&mi_00#6&2a8b1f5&0&0000`. The NT
/// namespace prefix `\??\` is rewritten to the Win32 form `\\?\`.
pub fn symbolic_link_instance(link: &str) -> String {
    let folded = fold_case(link);
    let folded = match folded.strip_prefix(r"\??\") {
        Some(rest) => format!(r"\\?\{rest}"),
        None => folded,
    };

    let cut = match interface_class_suffix() {
        Some(re) => re.find(&folded).map(|m| m.start()),
        None => folded.find("#{"),
    };

    match cut {
        Some(position) => folded[..position].to_string(),
        None => folded.trim_end_matches('\\').to_string(),
    }
}

/// Whether two symbolic links name the same device instance.
pub fn same_symbolic_link(a: &str, b: &str) -> bool {
    symbolic_link_instance(a) == symbolic_link_instance(b)
}

/// Whether two MMDevice endpoint IDs are the same endpoint.
pub fn same_endpoint_id(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// Renders a CoreAudio object ID as a descriptor.
pub fn object_id_descriptor(id: u32) -> String {
    id.to_string()
}

/// Parses a descriptor produced by [`object_id_descriptor`].
pub fn parse_object_id(descriptor: &str) -> Option<u32> {
    descriptor.trim().parse().ok()
}

/// Whether a file name looks like a V4L2 video node (`video0`, `video12`).
pub fn is_video_node_name(name: &str) -> bool {
    match video_node_name() {
        Some(re) => re.is_match(name),
        None => {
            name.strip_prefix("video")
                .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
        }
    }
}

/// Absolute path of a device node, resolving bare names against `device_dir`.
pub fn device_node_path(device_dir: &Path, node: &Path) -> PathBuf {
    if node.is_absolute() {
        node.to_path_buf()
    } else {
        device_dir.join(node)
    }
}

/// Descriptor string of a V4L2 device node.
pub fn device_node_descriptor(device_dir: &Path, node: &Path) -> String {
    device_node_path(device_dir, node)
        .to_string_lossy()
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINK_ENUMERATED: &str = r"\\?\usb#vid_046d&pid_0825&mi_00#6&2a8b1f5&0&0000#{e5323777-f976-4f5b-9b55-b94699c46e44}\global";
    const LINK_BROADCAST: &str = r"\\?\USB#VID_046D&PID_0825&MI_00#6&2A8B1F5&0&0000#{65E8773D-8F56-11D0-A3B9-00A0C9250965}\GLOBAL";

    #[test]
    fn strips_interface_class_suffix() {
        assert_eq!(
            symbolic_link_instance(LINK_ENUMERATED),
            r"\\?\usb#vid_046d&pid_0825&mi_00#6&2a8b1f5&0&0000"
        );
    }

    #[test]
    fn links_from_different_interface_classes_match() {
        assert!(same_symbolic_link(LINK_ENUMERATED, LINK_BROADCAST));
    }

    #[test]
    fn nt_prefix_matches_win32_prefix() {
        let nt = r"\??\USB#VID_046D&PID_0825&MI_00#6&2A8B1F5&0&0000#{65e8773d-8f56-11d0-a3b9-00a0c9250965}";

        assert!(same_symbolic_link(nt, LINK_ENUMERATED));
    }

    #[test]
    fn link_without_suffix_matches_full_link() {
        let bare = r"\\?\usb#vid_046d&pid_0825&mi_00#6&2a8b1f5&0&0000";

        assert!(same_symbolic_link(bare, LINK_BROADCAST));
    }

    #[test]
    fn different_instances_do_not_match() {
        let other = r"\\?\usb#vid_046d&pid_0825&mi_00#6&2a8b1f5&0&0001#{e5323777-f976-4f5b-9b55-b94699c46e44}\global";
        let prefix_only = r"\\?\usb#vid_046d&pid_0825";

        assert!(!same_symbolic_link(other, LINK_ENUMERATED));
        assert!(!same_symbolic_link(prefix_only, LINK_ENUMERATED));
    }

    #[test]
    fn endpoint_ids_compare_case_insensitively() {
        assert!(same_endpoint_id(
            "{0.0.1.00000000}.{6A1B2C3D-0000-4E5F-8A9B-0C1D2E3F4A5B}",
            "{0.0.1.00000000}.{6a1b2c3d-0000-4e5f-8a9b-0c1d2e3f4a5b}",
        ));
        assert!(!same_endpoint_id(
            "{0.0.1.00000000}.{6a1b2c3d-0000-4e5f-8a9b-0c1d2e3f4a5b}",
            "{0.0.0.00000000}.{6a1b2c3d-0000-4e5f-8a9b-0c1d2e3f4a5b}",
        ));
    }

    #[test]
    fn object_ids_round_trip() {
        assert_eq!(parse_object_id(&object_id_descriptor(73)), Some(73));
        assert_eq!(parse_object_id(" 41 "), Some(41));
        assert_eq!(parse_object_id("BuiltInMic"), None);
    }

    #[test]
    fn recognizes_video_nodes() {
        assert!(is_video_node_name("video0"));
        assert!(is_video_node_name("video12"));
        assert!(!is_video_node_name("video"));
        assert!(!is_video_node_name("video0p1"));
        assert!(!is_video_node_name("vbi0"));
    }

    #[test]
    fn resolves_bare_node_names() {
        let dir = Path::new("/dev");

        assert_eq!(
            device_node_descriptor(dir, Path::new("video2")),
            "/dev/video2"
        );
        assert_eq!(
            device_node_descriptor(dir, Path::new("/dev/video0")),
            "/dev/video0"
        );
    }
}
