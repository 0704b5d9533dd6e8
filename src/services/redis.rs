use anyhow::Result;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

const FETCH_KEY_PREFIX: &str = "playlist:body:";

/// Redis service, used as the shared tier of the playlist fetch cache
#[derive(Clone)]
pub struct RedisService {
    conn: ConnectionManager,
}

impl RedisService {
    /// Create a new Redis service with connection pooling
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    /// Store raw bytes with expiration (seconds)
    pub async fn set_bytes_ex(&self, key: &str, value: &[u8], ttl_seconds: u64) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl_seconds).await?;
        Ok(())
    }

    /// Get raw bytes
    pub async fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value)
    }

    /// Ping Redis to check connection
    pub async fn ping(&self) -> Result<bool> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(pong == "PONG")
    }

    // ============ Playlist Body Cache ============

    pub async fn get_playlist_body(&self, url_hash: &str) -> Result<Option<Vec<u8>>> {
        self.get_bytes(&fetch_key(url_hash)).await
    }

    pub async fn set_playlist_body(&self, url_hash: &str, body: &[u8], ttl_seconds: u64) -> Result<()> {
        self.set_bytes_ex(&fetch_key(url_hash), body, ttl_seconds).await
    }
}

fn fetch_key(url_hash: &str) -> String {
    format!("{}{}", FETCH_KEY_PREFIX, url_hash)
}
