//! Session lifecycle and namespace-operation exchanges.

use crate::ftp::error::FtpErrorKind;
use crate::tests::support::*;
use crate::{Encoding, FtpClient, ListingStrategy};

/// Anonymous login over plaintext: UTF-8 negotiated, MLSD chosen.
#[tokio::test]
async fn anonymous_login_negotiates_utf8_and_mlsd() {
    let (addr, handle) = serve(|mut c| async move {
        standard_login(&mut c, FEAT_MLSD_UTF8, true).await;
        c.expect("QUIT").await;
        c.send("221 bye").await;
        c
    })
    .await;

    let client = FtpClient::connect(test_config(addr)).await.unwrap();
    assert!(client.is_authenticated());

    let info = client.session_info();
    assert_eq!(info.encoding, Encoding::Utf8);
    assert_eq!(info.listing_strategy, ListingStrategy::Mlsd);
    assert_eq!(info.working_directory, "/");
    assert!(client.has_feature("MLSD"));

    client.quit().await.unwrap();
    assert!(!client.is_authenticated());

    let log = handle.await.unwrap();
    assert!(log.contains(&"USER anonymous".to_string()));
    assert!(log.contains(&"TYPE I".to_string()));
}

/// A server without MLSD leaves the session on the LIST strategy and
/// ASCII encoding.
#[tokio::test]
async fn feat_without_mlsd_falls_back_to_list() {
    let (addr, handle) = serve(|mut c| async move {
        standard_login(&mut c, FEAT_PLAIN, false).await;
        c
    })
    .await;

    let client = FtpClient::connect(test_config(addr)).await.unwrap();
    let info = client.session_info();
    assert_eq!(info.listing_strategy, ListingStrategy::List);
    assert_eq!(info.encoding, Encoding::Ascii);

    handle.await.unwrap();
}

/// A rejected password surfaces as AuthFailed with the reply code, and
/// the client bails out of the session.
#[tokio::test]
async fn rejected_password_is_auth_failed() {
    let (addr, handle) = serve(|mut c| async move {
        c.send("220 ready").await;
        c.expect("USER").await;
        c.send("331 need password").await;
        c.expect("PASS").await;
        c.send("530 login incorrect").await;
        c.expect("QUIT").await;
        c.send("221 bye").await;
        c
    })
    .await;

    let err = FtpClient::connect(test_config(addr)).await.unwrap_err();
    assert_eq!(err.kind, FtpErrorKind::AuthFailed);
    assert_eq!(err.code, Some(530));

    handle.await.unwrap();
}

/// Connecting while already connected logs out of the old session first.
#[tokio::test]
async fn relogin_quits_the_old_session_first() {
    let (addr, handle) = serve_listener(|listener| async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut c = ServerConn::new(stream);
        standard_login(&mut c, FEAT_MLSD_UTF8, true).await;
        c.expect("QUIT").await;
        c.send("221 bye").await;
        let mut log = c.log;

        let (stream, _) = listener.accept().await.unwrap();
        let mut c = ServerConn::new(stream);
        standard_login(&mut c, FEAT_MLSD_UTF8, true).await;
        log.extend(c.log);
        log
    })
    .await;

    let client = FtpClient::connect(test_config(addr)).await.unwrap();
    client.login().await.unwrap();
    assert!(client.is_authenticated());

    let log = handle.await.unwrap();
    assert_eq!(log.iter().filter(|l| *l == "QUIT").count(), 1);
    assert_eq!(log.iter().filter(|l| l.starts_with("USER")).count(), 2);
}

/// PWD extraction: the cached working directory is the quoted path from
/// the 257 reply.
#[tokio::test]
async fn change_directory_tracks_the_pwd_reply() {
    let (addr, handle) = serve(|mut c| async move {
        standard_login(&mut c, FEAT_MLSD_UTF8, true).await;
        c.expect("CWD /var/ftp").await;
        c.send("250 ok").await;
        c.expect("PWD").await;
        c.send("257 \"/var/ftp\" is current directory").await;
        c
    })
    .await;

    let client = FtpClient::connect(test_config(addr)).await.unwrap();
    let wd = client.change_directory("/var/ftp").await.unwrap();
    assert_eq!(wd, "/var/ftp");
    assert_eq!(client.working_directory(), "/var/ftp");
    assert!(client.working_directory().starts_with('/'));

    handle.await.unwrap();
}

/// Recursive mkdir of `/a/b/c` from `/`: probe each segment with CWD,
/// create on 550, and restore the original directory at the end.
#[tokio::test]
async fn recursive_mkdir_walks_and_restores() {
    let (addr, handle) = serve(|mut c| async move {
        standard_login(&mut c, FEAT_MLSD_UTF8, true).await;
        c.expect("CWD /").await;
        c.send("250 ok").await;
        for segment in ["a", "b", "c"] {
            c.expect(&format!("CWD {}", segment)).await;
            c.send("550 no such directory").await;
            c.expect(&format!("MKD {}", segment)).await;
            c.send(&format!("257 \"{}\" created", segment)).await;
            c.expect(&format!("CWD {}", segment)).await;
            c.send("250 ok").await;
        }
        c.expect("CWD /").await;
        c.send("250 ok").await;
        c
    })
    .await;

    let client = FtpClient::connect(test_config(addr)).await.unwrap();
    client.create_directory("/a/b/c").await.unwrap();
    assert_eq!(client.working_directory(), "/");

    let log = handle.await.unwrap();
    let expected = [
        "CWD /", "CWD a", "MKD a", "CWD a", "CWD b", "MKD b", "CWD b", "CWD c", "MKD c",
        "CWD c", "CWD /",
    ];
    assert_eq!(&log[log.len() - expected.len()..], &expected);
}

/// Segments that already exist are walked through without MKD.
#[tokio::test]
async fn recursive_mkdir_skips_existing_segments() {
    let (addr, handle) = serve(|mut c| async move {
        standard_login(&mut c, FEAT_MLSD_UTF8, true).await;
        c.expect("CWD /").await;
        c.send("250 ok").await;
        c.expect("CWD a").await;
        c.send("250 ok").await;
        c.expect("CWD b").await;
        c.send("550 missing").await;
        c.expect("MKD b").await;
        c.send("257 \"b\" created").await;
        c.expect("CWD b").await;
        c.send("250 ok").await;
        c.expect("CWD /").await;
        c.send("250 ok").await;
        c
    })
    .await;

    let client = FtpClient::connect(test_config(addr)).await.unwrap();
    client.create_directory("/a/b").await.unwrap();

    let log = handle.await.unwrap();
    assert!(!log.contains(&"MKD a".to_string()));
    assert!(log.contains(&"MKD b".to_string()));
}

/// Deleting a non-empty directory recurses: list, DELE files, recurse
/// into subdirectories, CWD up, RMD.
#[tokio::test]
async fn delete_directory_recurses_on_550() {
    let (addr, handle) = serve(|mut c| async move {
        standard_login(&mut c, FEAT_MLSD_UTF8, true).await;

        c.expect("RMD foo").await;
        c.send("550 directory not empty").await;
        c.expect("CWD foo").await;
        c.send("250 ok").await;

        let listener = offer_epsv(&mut c).await;
        c.expect("MLSD").await;
        c.send("150 here it comes").await;
        let (mut data, _) = listener.accept().await.unwrap();
        tokio::io::AsyncWriteExt::write_all(
            &mut data,
            b"type=cdir; .\r\ntype=pdir; ..\r\ntype=file;size=1; x\r\ntype=dir; y\r\n",
        )
        .await
        .unwrap();
        drop(data);
        c.send("226 done").await;

        c.expect("DELE x").await;
        c.send("250 ok").await;
        c.expect("RMD y").await;
        c.send("250 ok").await;
        c.expect("CWD ..").await;
        c.send("250 ok").await;
        c.expect("RMD foo").await;
        c.send("250 ok").await;
        c
    })
    .await;

    let client = FtpClient::connect(test_config(addr)).await.unwrap();
    client.delete_directory("foo").await.unwrap();

    let log = handle.await.unwrap();
    let tail: Vec<&str> = log.iter().map(String::as_str).collect();
    let rmd_first = tail.iter().position(|l| *l == "RMD foo").unwrap();
    let dele = tail.iter().position(|l| *l == "DELE x").unwrap();
    let rmd_last = tail.iter().rposition(|l| *l == "RMD foo").unwrap();
    assert!(rmd_first < dele && dele < rmd_last);
}

/// Rename: RNFR must yield 350, RNTO 250.
#[tokio::test]
async fn rename_handshake() {
    let (addr, handle) = serve(|mut c| async move {
        standard_login(&mut c, FEAT_MLSD_UTF8, true).await;
        c.expect("RNFR old").await;
        c.send("350 ready for RNTO").await;
        c.expect("RNTO new").await;
        c.send("250 renamed").await;
        c
    })
    .await;

    let client = FtpClient::connect(test_config(addr)).await.unwrap();
    client.rename("old", "new").await.unwrap();

    handle.await.unwrap();
}

/// A RNFR refusal aborts the rename before RNTO is sent.
#[tokio::test]
async fn rename_stops_when_rnfr_is_refused() {
    let (addr, handle) = serve(|mut c| async move {
        standard_login(&mut c, FEAT_MLSD_UTF8, true).await;
        c.expect("RNFR missing").await;
        c.send("550 no such file").await;
        c
    })
    .await;

    let client = FtpClient::connect(test_config(addr)).await.unwrap();
    let err = client.rename("missing", "new").await.unwrap_err();
    assert_eq!(err.kind, FtpErrorKind::CommandRejected);
    assert_eq!(err.code, Some(550));

    let log = handle.await.unwrap();
    assert!(!log.iter().any(|l| l.starts_with("RNTO")));
}

/// Concurrent commands are serialised by the send mutex: the server
/// sees strictly alternating command/reply pairs, never interleaving.
#[tokio::test]
async fn concurrent_commands_are_serialized() {
    let (addr, handle) = serve(|mut c| async move {
        standard_login(&mut c, FEAT_MLSD_UTF8, true).await;
        for _ in 0..3 {
            c.expect("NOOP").await;
            c.send("200 ok").await;
        }
        c
    })
    .await;

    let client = FtpClient::connect(test_config(addr)).await.unwrap();
    let (a, b, c) = tokio::join!(client.noop(), client.noop(), client.noop());
    a.unwrap();
    b.unwrap();
    c.unwrap();

    let log = handle.await.unwrap();
    assert_eq!(log.iter().filter(|l| *l == "NOOP").count(), 3);
}

/// SIZE requires 213 and parses the leading decimal.
#[tokio::test]
async fn size_parses_the_213_reply() {
    let (addr, handle) = serve(|mut c| async move {
        standard_login(&mut c, FEAT_MLSD_UTF8, true).await;
        c.expect("SIZE big.bin").await;
        c.send("213 1048576").await;
        c.expect("NOOP").await;
        c.send("200 ok").await;
        c
    })
    .await;

    let client = FtpClient::connect(test_config(addr)).await.unwrap();
    assert_eq!(client.size("big.bin").await.unwrap(), 1_048_576);
    client.noop().await.unwrap();

    handle.await.unwrap();
}
