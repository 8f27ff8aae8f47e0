//! 漫画详情与卷列表。

use tracing::debug;

use super::models::{ComicDetail, Volume};
use super::network::MirrorClient;
use super::parser::{extract_book_data_url, parse_comic_detail, parse_volume_data};
use super::transport::Transport;
use crate::base_system::errors::{KmoeError, Result};

pub const COMIC_DETAIL_TEMPLATE: &str = "https://{domain}/c/{comic_id}.htm";

/// 拉取详情页并跟随 `book_data.php` 取卷列表。
///
/// 所有镜像都失败（通常是 404）时视为漫画不存在。
pub fn get_comic_detail<T: Transport>(
    client: &MirrorClient<T>,
    comic_id: &str,
) -> Result<ComicDetail> {
    let resp = match client.get(COMIC_DETAIL_TEMPLATE, &[("comic_id", comic_id)]) {
        Ok(resp) => resp,
        Err(KmoeError::MirrorExhausted { .. }) => {
            return Err(KmoeError::ComicNotFound(comic_id.to_string()));
        }
        Err(err) => return Err(err),
    };
    if resp.status == 404 {
        return Err(KmoeError::ComicNotFound(comic_id.to_string()));
    }

    let mut detail = parse_comic_detail(&resp.body);
    if detail.meta.comic_id.is_empty() {
        detail.meta.comic_id = comic_id.to_string();
    }

    if let Some(path) = extract_book_data_url(&resp.body) {
        let template = format!("https://{{domain}}{path}");
        let vol_resp = client.get(&template, &[])?;
        detail.volumes = parse_volume_data(&vol_resp.body);
    }
    debug!(
        target: "mirror",
        comic_id,
        book_id = %detail.meta.book_id,
        volumes = detail.volumes.len(),
        "详情解析完成"
    );
    Ok(detail)
}

pub fn find_volume<'a>(detail: &'a ComicDetail, vol_id: &str) -> Result<&'a Volume> {
    detail
        .volumes
        .iter()
        .find(|v| v.vol_id == vol_id)
        .ok_or_else(|| KmoeError::VolumeNotFound(vol_id.to_string()))
}
