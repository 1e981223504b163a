//! FTP uploads over a passive-mode control session.

use async_trait::async_trait;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use super::{TestFile, UploadState, Uploader};
use crate::config::{ConfigStore, FtpSettings, Settings};
use crate::error::{AppError, Result};
use crate::logger::UploadLogger;
use crate::path::{concat_path, segments};

pub const UPLOADER_NAME: &str = "FTP";
const CONNECT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug)]
struct Reply {
    code: u16,
    text: String,
}

fn parse_code(line: &str) -> Result<u16> {
    line.get(..3)
        .and_then(|c| c.parse().ok())
        .ok_or_else(|| AppError::Ftp(format!("Malformed reply: {}", line.trim_end())))
}

/// Data address from a `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)` reply.
fn parse_pasv(text: &str) -> Result<SocketAddr> {
    let numbers: Vec<u8> = text
        .get(4..)
        .unwrap_or_default()
        .split(|c: char| !c.is_ascii_digit() && c != ',')
        .find(|part| part.matches(',').count() == 5)
        .map(|part| part.split(',').filter_map(|n| n.parse().ok()).collect())
        .unwrap_or_default();
    let [a, b, c, d, p1, p2] = numbers[..] else {
        return Err(AppError::Ftp(format!("Malformed PASV reply: {text}")));
    };
    let ip = Ipv4Addr::new(a, b, c, d);
    let port = u16::from(p1) << 8 | u16::from(p2);
    Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
}

/// Command name without its arguments, so credentials stay out of errors.
fn verb(command: &str) -> &str {
    command.split(' ').next().unwrap_or(command)
}

struct FtpSession {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl FtpSession {
    async fn connect(host: &str, port: u16) -> Result<Self> {
        let stream = tokio::time::timeout(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            TcpStream::connect((host, port)),
        )
        .await
        .map_err(|_| AppError::Ftp(format!("Timed out connecting to {host}:{port}")))?
        .map_err(AppError::Connect)?;
        let (read, write) = stream.into_split();
        let mut session = Self {
            reader: BufReader::new(read),
            writer: write,
        };

        let greeting = session.read_reply().await?;
        if greeting.code != 220 {
            return Err(AppError::Ftp(format!("Unexpected greeting: {}", greeting.text)));
        }
        Ok(session)
    }

    async fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        if self.reader.read_line(&mut line).await? == 0 {
            return Err(AppError::Ftp("Connection closed by server".to_string()));
        }
        Ok(line)
    }

    async fn read_reply(&mut self) -> Result<Reply> {
        let first = self.read_line().await?;
        let code = parse_code(&first)?;
        let mut text = first.trim_end().to_string();

        // Multi-line replies run from "123-" to "123 ".
        if first.as_bytes().get(3) == Some(&b'-') {
            let last = format!("{code} ");
            loop {
                let line = self.read_line().await?;
                text.push('\n');
                text.push_str(line.trim_end());
                if line.starts_with(&last) {
                    break;
                }
            }
        }
        Ok(Reply { code, text })
    }

    async fn command(&mut self, command: &str) -> Result<Reply> {
        tracing::trace!(target: "drivebackup::ftp", "> {}", verb(command));
        self.writer
            .write_all(format!("{command}\r\n").as_bytes())
            .await?;
        let reply = self.read_reply().await?;
        tracing::trace!(target: "drivebackup::ftp", "< {}", reply.text);
        Ok(reply)
    }

    async fn expect(&mut self, command: &str, codes: &[u16]) -> Result<Reply> {
        let reply = self.command(command).await?;
        if codes.contains(&reply.code) {
            Ok(reply)
        } else {
            Err(AppError::Ftp(format!("{} failed: {}", verb(command), reply.text)))
        }
    }

    async fn login(&mut self, username: &str, password: &str) -> Result<()> {
        let reply = self.command(&format!("USER {username}")).await?;
        match reply.code {
            230 => Ok(()),
            331 | 332 => {
                self.expect(&format!("PASS {password}"), &[230, 202]).await?;
                Ok(())
            }
            _ => Err(AppError::Auth(format!("FTP login rejected: {}", reply.text))),
        }
    }

    /// Create `dir`; a directory that already exists is not an error.
    async fn mkdir(&mut self, dir: &str) -> Result<()> {
        let reply = self.command(&format!("MKD {dir}")).await?;
        match reply.code {
            257 => Ok(()),
            521 | 550 => {
                tracing::debug!("FTP directory {} not created: {}", dir, reply.text);
                Ok(())
            }
            _ => Err(AppError::Ftp(format!("MKD failed: {}", reply.text))),
        }
    }

    async fn store(&mut self, path: &str, data: &[u8]) -> Result<()> {
        let pasv = self.expect("PASV", &[227]).await?;
        let addr = parse_pasv(&pasv.text)?;
        let mut data_stream = TcpStream::connect(addr).await?;

        self.expect(&format!("STOR {path}"), &[125, 150]).await?;
        data_stream.write_all(data).await?;
        data_stream.shutdown().await?;
        drop(data_stream);

        let done = self.read_reply().await?;
        if done.code != 226 && done.code != 250 {
            return Err(AppError::Ftp(format!("STOR failed: {}", done.text)));
        }
        Ok(())
    }

    async fn delete(&mut self, path: &str) -> Result<()> {
        self.expect(&format!("DELE {path}"), &[250]).await?;
        Ok(())
    }

    async fn quit(mut self) {
        if let Err(e) = self.command("QUIT").await {
            tracing::debug!("FTP QUIT failed: {}", e);
        }
    }
}

pub struct FtpUploader {
    settings: FtpSettings,
    store: ConfigStore,
    session: Option<FtpSession>,
    state: UploadState,
}

impl FtpUploader {
    pub fn new(store: ConfigStore, logger: Arc<dyn UploadLogger>, settings: &Settings) -> Self {
        let cfg = settings.methods.ftp.clone();
        Self {
            state: UploadState::new(UPLOADER_NAME, cfg.host.clone(), logger),
            settings: cfg,
            store,
            session: None,
        }
    }

    async fn open(&self) -> Result<FtpSession> {
        if self.settings.host.is_empty() {
            return Err(AppError::Config("FTP host is not set".to_string()));
        }
        let mut session = FtpSession::connect(&self.settings.host, self.settings.port).await?;
        session
            .login(&self.settings.username, &self.settings.password)
            .await?;
        session.expect("TYPE I", &[200]).await?;
        tracing::debug!("FTP session opened to {}", self.settings.host);
        Ok(session)
    }

    async fn try_test(&mut self, file: &Path) -> Result<()> {
        let file = TestFile::read(file).await?;
        let remote_dir = self.store.snapshot().remote_directory;

        let session = match self.session.take() {
            Some(s) => s,
            None => self.open().await?,
        };
        let session = self.session.insert(session);

        let mut dir = self.settings.base_dir.clone();
        for folder in segments(&remote_dir) {
            dir = concat_path(&dir, folder);
            session.mkdir(&dir).await?;
        }
        let remote_file = concat_path(&dir, &file.name);

        session.store(&remote_file, &file.data).await?;
        session.delete(&remote_file).await?;
        Ok(())
    }
}

#[async_trait]
impl Uploader for FtpUploader {
    fn name(&self) -> &'static str {
        UPLOADER_NAME
    }

    async fn test(&mut self, file: &Path) {
        self.state.begin();
        let result = self.try_test(file).await;
        if result.is_err() {
            // The control connection may be mid-reply; start over next time.
            self.session = None;
        }
        self.state.finish(result);
    }

    fn is_error_while_uploading(&self) -> bool {
        self.state.error_while_uploading()
    }

    async fn close(&mut self) {
        if let Some(session) = self.session.take() {
            session.quit().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pasv() {
        let addr = parse_pasv("227 Entering Passive Mode (127,0,0,1,195,80).").unwrap();
        assert_eq!(addr, "127.0.0.1:50000".parse().unwrap());

        let addr = parse_pasv("227 =10,1,2,3,4,1").unwrap();
        assert_eq!(addr, "10.1.2.3:1025".parse().unwrap());

        assert!(parse_pasv("227 nothing here").is_err());
        assert!(parse_pasv("227 (1,2,3,4,5)").is_err());
    }

    #[test]
    fn test_parse_code() {
        assert_eq!(parse_code("220 ready\r\n").unwrap(), 220);
        assert!(parse_code("hi\r\n").is_err());
    }

    #[test]
    fn test_verb_hides_arguments() {
        assert_eq!(verb("PASS secret"), "PASS");
        assert_eq!(verb("QUIT"), "QUIT");
    }
}
