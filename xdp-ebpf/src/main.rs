#![no_std]
#![no_main]

use aya_ebpf::{
    bindings::xdp_action,
    macros::{map, xdp},
    maps::XskMap,
    programs::XdpContext,
};

// one AF_XDP socket per rx queue. userspace inserts the socket fd at the queue index
// and removes it on teardown. an empty slot means "nothing registered yet".
const QUEUE_SLOTS: u32 = 64;

#[map]
static XSKS_MAP: XskMap = XskMap::with_max_entries(QUEUE_SLOTS, 0);

// action for frames whose queue has no socket. patched by the loader before load,
// XDP_DROP unless the deployment asks for fallback to the kernel stack.
#[no_mangle]
static MISS_ACTION: u32 = xdp_action::XDP_DROP;

#[xdp]
pub fn xdp_redirect(ctx: XdpContext) -> u32 {
    let miss = unsafe { core::ptr::read_volatile(&MISS_ACTION) };
    let queue_id = unsafe { (*ctx.ctx).rx_queue_index };

    if queue_id >= QUEUE_SLOTS {
        return miss;
    }

    // the helper returns the low bits of flags when the slot is empty.
    // a full or closing socket ring drops the frame later in the redirect path.
    match XSKS_MAP.redirect(queue_id, miss as u64) {
        Ok(action) | Err(action) => action,
    }
}

#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    unsafe { core::hint::unreachable_unchecked() }
}
