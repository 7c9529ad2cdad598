//! End-to-end tests against a scripted loopback FTP server.

mod support;

mod session_tests;
