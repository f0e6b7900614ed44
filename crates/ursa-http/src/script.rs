//! iPXE boot-script generation.
//!
//! The script is rendered per request so every URL points back at whatever
//! host/port the client reached us on. The `${target}` reference is iPXE
//! syntax and must survive into the output verbatim.

/// Render the boot script for a client that reached us at `http_host`
/// (the request's `Host` header).
pub fn boot_script(http_host: &str) -> String {
    let initrd = format!("http://{http_host}/static/initrd.img");
    let kernel = format!("http://{http_host}/static/kernel");
    let rootfs = format!("http://{http_host}/static/filesystem.squashfs");
    let metadata = format!("http://{http_host}/init/");

    format!(
        r#"#!ipxe

:boot_menu
menu Select the boot source
item default Default
item ipxe_shell Shell
choose --default default --timeout 3000 target && goto ${{target}}

:default
initrd {initrd} || goto boot_menu
boot {kernel} fetch={rootfs} boot=live components text console=ttyS0,115200 console=tty0 initrd=initrd.img apparmor=0 ds=nocloud-net;s={metadata} || goto boot_menu

:ipxe_shell
shell || goto boot_menu
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_shape() {
        let script = boot_script("192.0.2.1");

        assert!(script.starts_with("#!ipxe\n"));
        assert!(script.contains("initrd http://192.0.2.1/static/initrd.img || goto boot_menu"));
        assert!(script.contains("boot http://192.0.2.1/static/kernel"));
        assert!(script.contains("fetch=http://192.0.2.1/static/filesystem.squashfs"));
        assert!(script.contains("ds=nocloud-net;s=http://192.0.2.1/init/"));
        // iPXE's own variable must not be eaten by the formatter.
        assert!(script.contains("goto ${target}"));
    }

    #[test]
    fn script_respects_host_header_port() {
        let script = boot_script("10.0.0.1:8080");
        assert!(script.contains("http://10.0.0.1:8080/static/kernel"));
    }
}
